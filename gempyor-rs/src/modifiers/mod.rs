//! Parameter modifiers ("NPIs").
//!
//! A modifier turns one config node into a dense (subpop × day) reduction per
//! parameter it touches, plus a long-form table of the values it drew. Leaf
//! modifiers draw one value per spatial unit; [`StackedModifier`] composes
//! other modifiers with the overlap algebra in [`crate::overlap`].
//!
//! Concrete kinds are looked up by their config `method` in a static
//! registry, and every kind is built through the same entry point so a stack
//! can build its children without knowing what they are.

mod multi;
mod period;
mod single;
mod stacked;

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use nalgebra::DMatrix;
use rand::Rng;

pub use multi::MultiPeriodModifier;
pub use period::{PeriodModifier, SubpopDraw};
pub use single::SinglePeriodModifier;
pub use stacked::StackedModifier;

use crate::config::{ModifierConfig, StackLimits};
use crate::error::{Error, Result};
use crate::overlap::{OverlapMethods, normalize_parameter_name};
use crate::table::{LoadedModifiers, ModifierTable};
use crate::time::TimeSpan;

/// Everything a modifier needs from the surrounding model: the subpop
/// universe, the simulation span, the overlap partition and the library of
/// named modifier definitions.
#[derive(Debug, Clone)]
pub struct ModifierContext<'a> {
    pub span: TimeSpan,
    pub subpops: &'a [String],
    pub overlap: Arc<OverlapMethods>,
    pub library: &'a BTreeMap<String, ModifierConfig>,
    pub loaded: Option<&'a LoadedModifiers>,
    pub sanitize: bool,
    pub lint_reductions: bool,
    pub stack_limits: StackLimits,
    subpop_index: HashMap<&'a str, usize>,
}

impl<'a> ModifierContext<'a> {
    pub fn new(
        span: TimeSpan,
        subpops: &'a [String],
        overlap: OverlapMethods,
        library: &'a BTreeMap<String, ModifierConfig>,
    ) -> Self {
        let subpop_index = subpops
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();
        Self {
            span,
            subpops,
            overlap: Arc::new(overlap),
            library,
            loaded: None,
            sanitize: true,
            lint_reductions: false,
            stack_limits: StackLimits::default(),
            subpop_index,
        }
    }

    pub fn with_loaded(mut self, loaded: Option<&'a LoadedModifiers>) -> Self {
        self.loaded = loaded;
        self
    }

    pub fn with_sanitize(mut self, sanitize: bool) -> Self {
        self.sanitize = sanitize;
        self
    }

    pub fn with_lint_reductions(mut self, lint: bool) -> Self {
        self.lint_reductions = lint;
        self
    }

    pub fn with_stack_limits(mut self, limits: StackLimits) -> Self {
        self.stack_limits = limits;
        self
    }

    pub fn subpop_index(&self, subpop: &str) -> Option<usize> {
        self.subpop_index.get(subpop).copied()
    }

    /// (subpops, days) of every dense reduction built in this context.
    pub fn shape(&self) -> (usize, usize) {
        (self.subpops.len(), self.span.n_days())
    }
}

/// Capabilities shared by every modifier kind.
pub trait ModifierBase {
    fn name(&self) -> &str;

    /// Normalized names of the parameters this modifier touches.
    fn param_names(&self) -> Vec<&str>;

    /// Names of every leaf modifier, recursing through stacks.
    fn leaf_names(&self) -> Vec<&str>;

    /// Raw dense reduction for a normalized parameter name, if touched.
    fn reduction(&self, param: &str) -> Option<&DMatrix<f64>>;

    fn overlap(&self) -> &OverlapMethods;

    fn shape(&self) -> (usize, usize);

    fn get_reductions_to_write(&self) -> Result<ModifierTable>;

    /// Dense (subpop × day) effect on `param`, or a matrix filled with the
    /// parameter's neutral reduction when this modifier leaves it alone.
    fn get_reduction(&self, param: &str) -> Cow<'_, DMatrix<f64>> {
        let param = normalize_parameter_name(param);
        match self.reduction(&param) {
            Some(r) => Cow::Borrowed(r),
            None => {
                let (rows, cols) = self.shape();
                let neutral = self.overlap().method_for(&param).neutral_reduction();
                Cow::Owned(DMatrix::from_element(rows, cols, neutral))
            }
        }
    }

    fn touches(&self, param: &str) -> bool {
        self.reduction(&normalize_parameter_name(param)).is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierKind {
    SinglePeriod,
    MultiPeriod,
    Stacked,
}

/// Config `method` strings, matched case-sensitively. `Reduce`,
/// `MultiTimeReduce` and `Stacked` are the older spellings.
const REGISTRY: &[(&str, ModifierKind)] = &[
    ("SinglePeriodModifier", ModifierKind::SinglePeriod),
    ("Reduce", ModifierKind::SinglePeriod),
    ("MultiPeriodModifier", ModifierKind::MultiPeriod),
    ("MultiTimeReduce", ModifierKind::MultiPeriod),
    ("StackedModifier", ModifierKind::Stacked),
    ("Stacked", ModifierKind::Stacked),
];

impl ModifierKind {
    pub fn from_method(method: &str) -> Result<Self> {
        REGISTRY
            .iter()
            .find(|(name, _)| *name == method)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| Error::UnknownMethod {
                method: method.to_string(),
                known: REGISTRY
                    .iter()
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

#[derive(Debug, Clone)]
pub enum Modifier {
    SinglePeriod(SinglePeriodModifier),
    MultiPeriod(MultiPeriodModifier),
    Stacked(StackedModifier),
}

impl Modifier {
    /// Build the modifier defined by `config`, drawing fresh values or
    /// reloading them from `ctx.loaded`.
    pub fn execute<R: Rng + ?Sized>(
        name: &str,
        config: &ModifierConfig,
        ctx: &ModifierContext<'_>,
        rng: &mut R,
    ) -> Result<Self> {
        Self::build(name, config, ctx, &mut Vec::new(), rng)
    }

    /// Build the library entry called `name`.
    pub fn from_library<R: Rng + ?Sized>(
        name: &str,
        ctx: &ModifierContext<'_>,
        rng: &mut R,
    ) -> Result<Self> {
        Self::build_named(name, ctx, &mut Vec::new(), rng)
    }

    pub(crate) fn build_named<R: Rng + ?Sized>(
        name: &str,
        ctx: &ModifierContext<'_>,
        ancestors: &mut Vec<String>,
        rng: &mut R,
    ) -> Result<Self> {
        let config = ctx.library.get(name).ok_or_else(|| Error::MissingModifier {
            name: name.to_string(),
        })?;
        Self::build(name, config, ctx, ancestors, rng)
    }

    pub(crate) fn build<R: Rng + ?Sized>(
        name: &str,
        config: &ModifierConfig,
        ctx: &ModifierContext<'_>,
        ancestors: &mut Vec<String>,
        rng: &mut R,
    ) -> Result<Self> {
        let modifier = match ModifierKind::from_method(&config.method)? {
            ModifierKind::SinglePeriod => {
                Modifier::SinglePeriod(SinglePeriodModifier::new(name, config, ctx, rng)?)
            }
            ModifierKind::MultiPeriod => {
                Modifier::MultiPeriod(MultiPeriodModifier::new(name, config, ctx, rng)?)
            }
            ModifierKind::Stacked => {
                Modifier::Stacked(StackedModifier::new(name, config, ctx, ancestors, rng)?)
            }
        };
        Ok(modifier)
    }

    pub fn kind(&self) -> ModifierKind {
        match self {
            Modifier::SinglePeriod(_) => ModifierKind::SinglePeriod,
            Modifier::MultiPeriod(_) => ModifierKind::MultiPeriod,
            Modifier::Stacked(_) => ModifierKind::Stacked,
        }
    }

    fn as_base(&self) -> &dyn ModifierBase {
        match self {
            Modifier::SinglePeriod(m) => &**m,
            Modifier::MultiPeriod(m) => &**m,
            Modifier::Stacked(m) => m,
        }
    }
}

impl ModifierBase for Modifier {
    fn name(&self) -> &str {
        self.as_base().name()
    }

    fn param_names(&self) -> Vec<&str> {
        self.as_base().param_names()
    }

    fn leaf_names(&self) -> Vec<&str> {
        self.as_base().leaf_names()
    }

    fn reduction(&self, param: &str) -> Option<&DMatrix<f64>> {
        self.as_base().reduction(param)
    }

    fn overlap(&self) -> &OverlapMethods {
        self.as_base().overlap()
    }

    fn shape(&self) -> (usize, usize) {
        self.as_base().shape()
    }

    fn get_reductions_to_write(&self) -> Result<ModifierTable> {
        self.as_base().get_reductions_to_write()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;
    use serde_json::Value;

    use super::*;

    pub fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    pub fn subpops(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    pub fn span() -> TimeSpan {
        TimeSpan::new(date("2020-01-01"), date("2020-01-10")).unwrap()
    }

    pub fn library(value: Value) -> BTreeMap<String, ModifierConfig> {
        serde_json::from_value(value).unwrap()
    }

    pub fn overlap() -> OverlapMethods {
        OverlapMethods::new(["gamma"], ["beta"]).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};
    use serde_json::json;

    #[test]
    fn test_registry_is_case_sensitive() {
        assert_eq!(
            ModifierKind::from_method("SinglePeriodModifier").unwrap(),
            ModifierKind::SinglePeriod
        );
        assert_eq!(ModifierKind::from_method("Reduce").unwrap(), ModifierKind::SinglePeriod);
        let err = ModifierKind::from_method("singleperiodmodifier").unwrap_err();
        assert!(matches!(err, Error::UnknownMethod { .. }));
    }

    #[test]
    fn test_unknown_method_never_falls_back() {
        let subpops = subpops(&["A"]);
        let library = library(json!({
            "mystery": {"method": "HalfReduce", "parameter": "beta", "value": 0.5}
        }));
        let ctx = ModifierContext::new(span(), &subpops, overlap(), &library);
        let mut rng = StdRng::seed_from_u64(0);
        let err = Modifier::from_library("mystery", &ctx, &mut rng).unwrap_err();
        assert!(matches!(err, Error::UnknownMethod { .. }));
        let err = Modifier::from_library("absent", &ctx, &mut rng).unwrap_err();
        assert!(matches!(err, Error::MissingModifier { .. }));
    }

    #[test]
    fn test_execute_builds_inline_stack() {
        let subpops = subpops(&["A", "B"]);
        let library = library(json!({
            "masks": {"method": "SinglePeriodModifier", "parameter": "beta", "value": 0.5}
        }));
        let ctx = ModifierContext::new(span(), &subpops, overlap(), &library);
        let config: ModifierConfig = serde_json::from_value(json!({
            "method": "StackedModifier",
            "modifiers": [
                "masks",
                {"method": "SinglePeriodModifier", "parameter": "beta", "value": 0.5,
                 "period_start_date": "2020-01-06", "period_end_date": "2020-01-10"}
            ]
        }))
        .unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let modifier = Modifier::execute("npis", &config, &ctx, &mut rng).unwrap();

        assert_eq!(modifier.kind(), ModifierKind::Stacked);
        assert_eq!(modifier.name(), "npis");
        assert_eq!(modifier.leaf_names(), vec!["masks", "npis_1"]);
        let beta = modifier.get_reduction("beta");
        assert_eq!(beta[(0, 0)], 0.5);
        assert_eq!(beta[(1, 9)], 0.75);
        assert_eq!(modifier.get_reductions_to_write().unwrap().len(), 4);
    }

    #[test]
    fn test_untouched_parameter_gets_class_neutral() {
        let subpops = subpops(&["A", "B"]);
        let library = library(json!({
            "masks": {"method": "SinglePeriodModifier", "parameter": "sigma", "value": 0.3}
        }));
        let ctx = ModifierContext::new(span(), &subpops, overlap(), &library);
        let mut rng = StdRng::seed_from_u64(0);
        let modifier = Modifier::from_library("masks", &ctx, &mut rng).unwrap();
        assert_eq!(modifier.kind(), ModifierKind::SinglePeriod);
        assert!(modifier.touches(" Sigma"));
        assert!(modifier.get_reduction("gamma").iter().all(|v| *v == 0.0));
        assert!(modifier.get_reduction("beta").iter().all(|v| *v == 0.0));
        assert!(modifier.get_reduction("alpha").iter().all(|v| *v == 1.0));
        assert!(modifier.get_reduction("SIGMA").iter().all(|v| *v == 0.3));
    }
}
