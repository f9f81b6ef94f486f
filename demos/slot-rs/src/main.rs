pub mod output;

use anyhow::{Context, bail};
use gempyor::{
    LoadedModifiers, ModelConfig, ModelInfo, ModifierBase, ModifierTable, ParameterTable,
    SlotEnvironment,
};
use log::{LevelFilter, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Deserialize;
use simple_logger::SimpleLogger;

use output::{REDUCED_HEADERS, reduced_parameter_rows};

#[derive(Debug, Deserialize)]
struct SlotInput {
    /// SEIR scenario; defaults to the first one the config lists.
    scenario: Option<String>,
    outcome_scenario: Option<String>,
    #[serde(default)]
    lint_reductions: bool,
}

fn load_modifiers(
    env: &SlotEnvironment<SlotInput>,
    key: &str,
) -> anyhow::Result<Option<LoadedModifiers>> {
    let Some(path) = env.file(key) else {
        return Ok(None);
    };
    let table = ModifierTable::read_csv(path)
        .with_context(|| format!("reading {key} from {}", path.display()))?;
    info!("reloading {} modifier rows from {}", table.len(), path.display());
    Ok(Some(LoadedModifiers::new(table)))
}

fn main() -> anyhow::Result<()> {
    SimpleLogger::new().with_level(LevelFilter::Info).env().init()?;

    let env = SlotEnvironment::<SlotInput>::load().context("reading run description")?;
    let Some(input) = env.input.as_ref() else {
        bail!("run description has no input");
    };
    let config_path = env.file("config").context("model.files.config is required")?;
    let config = ModelConfig::from_path(config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    let model = ModelInfo::from_config(&config)?.with_lint_reductions(input.lint_reductions);

    let mut rng = StdRng::seed_from_u64(env.slot_seed());
    info!("slot {} seeded with {}", env.slot, env.slot_seed());

    let tensor = match env.file("init_spar") {
        Some(path) => model.parameters.load(&ParameterTable::read_csv(path)?, &mut rng)?,
        None => model.parameters.draw(&mut rng)?,
    };
    env.write_parameters(&env.slot_filename("spar"), &model.parameters.to_table(&tensor))?;

    let scenario = match &input.scenario {
        Some(s) => s.clone(),
        None => model
            .seir_scenarios()
            .first()
            .cloned()
            .context("config lists no seir_modifiers scenarios")?,
    };
    let snpi = load_modifiers(&env, "init_snpi")?;
    let seir = model.build_seir_modifier(&scenario, snpi.as_ref(), &mut rng)?;
    env.write_modifiers(&env.slot_filename("snpi"), &seir.get_reductions_to_write()?)?;

    match &input.outcome_scenario {
        Some(outcome_scenario) => {
            let hnpi = load_modifiers(&env, "init_hnpi")?;
            let outcome = model.build_outcome_modifier(outcome_scenario, hnpi.as_ref(), &mut rng)?;
            let table = outcome.get_reductions_to_write()?;
            env.write_modifiers(&env.slot_filename("hnpi"), &table)?;
        }
        None if !model.outcome_scenarios().is_empty() => {
            info!(
                "no outcome_scenario requested; skipping {}",
                model.outcome_scenarios().join(", ")
            );
        }
        None => {}
    }

    let reduced = model.parameters.reduce(&tensor, Some(&seir))?;
    env.write_csv(
        &env.slot_filename("reduced_parameters"),
        &REDUCED_HEADERS,
        &reduced_parameter_rows(&reduced, &model.span, &model.subpops),
    )?;
    info!("slot {} done: scenario {scenario}", env.slot);
    Ok(())
}
