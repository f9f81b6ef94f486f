//! Typed model configuration, parsed once from TOML or JSON.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::distribution::ValueSpec;
use crate::error::Result;
use crate::overlap::OverlapMethod;
use crate::time::Period;

pub const MAX_STACK_SIZE_VAR: &str = "FLEPI_MAX_STACK_SIZE";
pub const DEFAULT_MAX_STACK_SIZE: usize = 50_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_sanitize")]
    pub sanitize: bool,
    pub subpop_setup: SubpopSetup,
    #[serde(default)]
    pub seir: Option<SeirConfig>,
    #[serde(default)]
    pub seir_modifiers: Option<ModifiersSection>,
    #[serde(default)]
    pub outcome_modifiers: Option<ModifiersSection>,
}

fn default_sanitize() -> bool {
    true
}

impl ModelConfig {
    /// Read a config file; `.toml` files are parsed as TOML, everything else
    /// as JSON.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&raw),
            _ => Self::from_json_str(&raw),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubpopSetup {
    #[serde(default)]
    pub subpops: Option<Vec<String>>,
    /// CSV with a `subpop` column, one row per subpop.
    #[serde(default)]
    pub geodata: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeirConfig {
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterConfig {
    #[serde(default)]
    pub value: Option<ValueSpec>,
    #[serde(default)]
    pub timeseries: Option<PathBuf>,
    #[serde(default)]
    pub stacked_modifier_method: Option<OverlapMethod>,
    #[serde(default)]
    pub rolling_mean_windows: Option<usize>,
}

/// `seir_modifiers` / `outcome_modifiers` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModifiersSection {
    #[serde(default)]
    pub scenarios: Vec<String>,
    #[serde(default)]
    pub modifiers: BTreeMap<String, ModifierConfig>,
    /// Extra overlap classes for parameters not declared under `seir`
    /// (outcome parameters, typically).
    #[serde(default)]
    pub stacked_modifier_method: Option<OverlapOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverlapOverrides {
    #[serde(default)]
    pub sum: Vec<String>,
    #[serde(default)]
    pub reduction_product: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModifierConfig {
    pub method: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parameter: Option<String>,
    #[serde(default)]
    pub value: Option<ValueSpec>,
    #[serde(default)]
    pub subpop: Option<SubpopSelection>,
    #[serde(default)]
    pub subpop_groups: Option<SubpopGroupsConfig>,
    #[serde(default)]
    pub period_start_date: Option<NaiveDate>,
    #[serde(default)]
    pub period_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub groups: Option<Vec<GroupConfig>>,
    #[serde(default)]
    pub modifiers: Option<Vec<ModifierRef>>,
}

/// One `groups:` entry of a multi-period modifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupConfig {
    #[serde(default)]
    pub subpop: Option<SubpopSelection>,
    #[serde(default)]
    pub subpop_groups: Option<SubpopGroupsConfig>,
    #[serde(default)]
    pub periods: Vec<Period>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubpopSelection {
    /// `"all"` or a single subpop name.
    Keyword(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubpopGroupsConfig {
    /// Only `"all"` is meaningful.
    Keyword(String),
    Flat(Vec<String>),
    Nested(Vec<Vec<String>>),
}

/// Entry of a stacked modifier's `modifiers` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModifierRef {
    Name(String),
    Inline(Box<ModifierConfig>),
}

/// Retention limit for stacked-modifier metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackLimits {
    pub max_rows: usize,
}

impl Default for StackLimits {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_STACK_SIZE,
        }
    }
}

impl StackLimits {
    /// Read `FLEPI_MAX_STACK_SIZE`, falling back to the default when unset or
    /// unparsable.
    pub fn from_env() -> Self {
        let max_rows = std::env::var(MAX_STACK_SIZE_VAR)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_MAX_STACK_SIZE);
        Self { max_rows }
    }
}
