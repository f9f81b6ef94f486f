//! Parameter modifiers for metapopulation epidemic models.
//!
//! A model config declares parameters and a library of modifiers ("NPIs")
//! that scale those parameters over time and space. Building a scenario
//! draws one value per spatial unit, composes stacked modifiers, and yields
//! dense (subpop × day) reductions plus a long-form table that lets a later
//! slot reproduce the same draws.

pub mod config;
pub mod distribution;
pub mod environment;
pub mod error;
pub mod model_info;
pub mod modifiers;
pub mod overlap;
pub mod parameters;
pub mod spatial;
pub mod table;
pub mod time;

pub use config::{ModelConfig, ModifierConfig, StackLimits};
pub use distribution::{Distribution, ValueSpec};
pub use environment::SlotEnvironment;
pub use error::{Error, ErrorKind, Result};
pub use model_info::ModelInfo;
pub use modifiers::{
    Modifier, ModifierBase, ModifierContext, ModifierKind, MultiPeriodModifier,
    SinglePeriodModifier, StackedModifier,
};
pub use overlap::{OverlapMethod, OverlapMethods};
pub use parameters::{ParameterTable, ParameterTensor, Parameters};
pub use table::{LoadedModifiers, ModifierRecord, ModifierTable};
pub use time::{Period, TimeSpan};
