use std::collections::BTreeSet;
use std::path::Path;

use log::info;
use rand::Rng;
use serde::Deserialize;

use crate::config::{ModelConfig, ModifiersSection, StackLimits, SubpopSetup};
use crate::error::{Error, Result};
use crate::modifiers::{Modifier, ModifierContext};
use crate::overlap::OverlapMethods;
use crate::parameters::Parameters;
use crate::table::LoadedModifiers;
use crate::time::TimeSpan;

/// Resolved model setup for one run: subpops, dates, parameters and the two
/// modifier libraries.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub span: TimeSpan,
    pub subpops: Vec<String>,
    pub sanitize: bool,
    pub parameters: Parameters,
    pub stack_limits: StackLimits,
    pub lint_reductions: bool,
    seir_modifiers: Option<ModifiersSection>,
    outcome_modifiers: Option<ModifiersSection>,
}

#[derive(Debug, Deserialize)]
struct GeodataRow {
    subpop: String,
}

impl ModelInfo {
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let span = TimeSpan::new(config.start_date, config.end_date)?;
        let subpops = load_subpops(&config.subpop_setup)?;
        let parameter_configs = config
            .seir
            .as_ref()
            .map(|s| s.parameters.clone())
            .unwrap_or_default();
        let parameters = Parameters::new(&parameter_configs, span, &subpops)?;
        info!(
            "model {}: {} subpops, {} days, {} parameters",
            config.name.as_deref().unwrap_or("unnamed"),
            subpops.len(),
            span.n_days(),
            parameter_configs.len()
        );
        Ok(Self {
            name: config.name.clone().unwrap_or_default(),
            span,
            subpops,
            sanitize: config.sanitize,
            parameters,
            stack_limits: StackLimits::from_env(),
            lint_reductions: false,
            seir_modifiers: config.seir_modifiers.clone(),
            outcome_modifiers: config.outcome_modifiers.clone(),
        })
    }

    pub fn with_stack_limits(mut self, limits: StackLimits) -> Self {
        self.stack_limits = limits;
        self
    }

    pub fn with_lint_reductions(mut self, lint: bool) -> Self {
        self.lint_reductions = lint;
        self
    }

    pub fn seir_scenarios(&self) -> &[String] {
        self.seir_modifiers
            .as_ref()
            .map(|s| s.scenarios.as_slice())
            .unwrap_or_default()
    }

    pub fn outcome_scenarios(&self) -> &[String] {
        self.outcome_modifiers
            .as_ref()
            .map(|s| s.scenarios.as_slice())
            .unwrap_or_default()
    }

    pub fn build_seir_modifier<R: Rng + ?Sized>(
        &self,
        scenario: &str,
        loaded: Option<&LoadedModifiers>,
        rng: &mut R,
    ) -> Result<Modifier> {
        self.build_modifier("seir_modifiers", self.seir_modifiers.as_ref(), scenario, loaded, rng)
    }

    pub fn build_outcome_modifier<R: Rng + ?Sized>(
        &self,
        scenario: &str,
        loaded: Option<&LoadedModifiers>,
        rng: &mut R,
    ) -> Result<Modifier> {
        self.build_modifier(
            "outcome_modifiers",
            self.outcome_modifiers.as_ref(),
            scenario,
            loaded,
            rng,
        )
    }

    fn overlap_for(&self, section: &ModifiersSection) -> Result<OverlapMethods> {
        let mut methods = self.parameters.overlap_methods()?;
        if let Some(extra) = &section.stacked_modifier_method {
            methods.merge(&OverlapMethods::new(&extra.sum, &extra.reduction_product)?)?;
        }
        Ok(methods)
    }

    fn build_modifier<R: Rng + ?Sized>(
        &self,
        section_name: &'static str,
        section: Option<&ModifiersSection>,
        scenario: &str,
        loaded: Option<&LoadedModifiers>,
        rng: &mut R,
    ) -> Result<Modifier> {
        let section = section.ok_or(Error::MissingSection(section_name))?;
        if !section.scenarios.iter().any(|s| s == scenario) {
            return Err(Error::UnknownScenario {
                section: section_name,
                scenario: scenario.to_string(),
            });
        }
        let overlap = self.overlap_for(section)?;
        let ctx = ModifierContext::new(self.span, &self.subpops, overlap, &section.modifiers)
            .with_loaded(loaded)
            .with_sanitize(self.sanitize)
            .with_lint_reductions(self.lint_reductions)
            .with_stack_limits(self.stack_limits);
        info!(
            "building {section_name} scenario {scenario} ({})",
            if loaded.is_some() { "reload" } else { "fresh draw" }
        );
        Modifier::from_library(scenario, &ctx, rng)
    }
}

fn load_subpops(setup: &SubpopSetup) -> Result<Vec<String>> {
    let subpops = match (&setup.subpops, &setup.geodata) {
        (Some(names), None) => names.clone(),
        (None, Some(path)) => read_geodata(path)?,
        _ => {
            return Err(Error::InvalidConfig(
                "subpop_setup needs exactly one of subpops or geodata".to_string(),
            ));
        }
    };
    if subpops.is_empty() {
        return Err(Error::InvalidConfig("subpop_setup lists no subpops".to_string()));
    }
    let unique: BTreeSet<&String> = subpops.iter().collect();
    if unique.len() != subpops.len() {
        return Err(Error::InvalidConfig("subpop_setup lists a subpop twice".to_string()));
    }
    Ok(subpops)
}

fn read_geodata(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut subpops = Vec::new();
    for row in reader.deserialize() {
        let row: GeodataRow = row?;
        subpops.push(row.subpop);
    }
    Ok(subpops)
}
