use std::ops::Deref;

use rand::Rng;

use super::ModifierContext;
use super::period::{GroupPlan, PeriodModifier, affected_subpops};
use crate::config::ModifierConfig;
use crate::error::{Error, Result};
use crate::spatial::SpatialGroups;

/// One parameter reduced over several periods. Each `groups:` entry selects
/// its own subpops, spatial grouping and period list; a subpop may appear in
/// at most one entry.
#[derive(Debug, Clone)]
pub struct MultiPeriodModifier(PeriodModifier);

impl MultiPeriodModifier {
    pub fn new<R: Rng + ?Sized>(
        name: &str,
        config: &ModifierConfig,
        ctx: &ModifierContext<'_>,
        rng: &mut R,
    ) -> Result<Self> {
        let missing = |field| Error::MissingField {
            modifier: name.to_string(),
            field,
        };
        let parameter = config.parameter.as_deref().ok_or_else(|| missing("parameter"))?;
        let value = config.value.as_ref().ok_or_else(|| missing("value"))?;
        let group_configs = config
            .groups
            .as_deref()
            .filter(|g| !g.is_empty())
            .ok_or_else(|| missing("groups"))?;

        let mut plans = Vec::with_capacity(group_configs.len());
        for group in group_configs {
            if group.periods.is_empty() {
                return Err(missing("periods"));
            }
            let selection = group.subpop.as_ref().or(config.subpop.as_ref());
            let affected = affected_subpops(name, selection, ctx)?;
            let groups = SpatialGroups::resolve(name, group.subpop_groups.as_ref(), &affected)?;
            plans.push(GroupPlan {
                groups,
                periods: group.periods.clone(),
            });
        }
        PeriodModifier::build(name, parameter, value, plans, ctx, rng).map(Self)
    }
}

impl Deref for MultiPeriodModifier {
    type Target = PeriodModifier;

    fn deref(&self) -> &PeriodModifier {
        &self.0
    }
}
