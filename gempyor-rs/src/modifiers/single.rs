use std::ops::Deref;

use rand::Rng;

use super::ModifierContext;
use super::period::{GroupPlan, PeriodModifier, affected_subpops};
use crate::config::ModifierConfig;
use crate::error::{Error, Result};
use crate::spatial::SpatialGroups;
use crate::time::Period;

/// One parameter reduced over a single period (the whole simulation when
/// `period_start_date`/`period_end_date` are absent), one draw per spatial
/// unit.
#[derive(Debug, Clone)]
pub struct SinglePeriodModifier(PeriodModifier);

impl SinglePeriodModifier {
    pub fn new<R: Rng + ?Sized>(
        name: &str,
        config: &ModifierConfig,
        ctx: &ModifierContext<'_>,
        rng: &mut R,
    ) -> Result<Self> {
        let parameter = config.parameter.as_deref().ok_or_else(|| Error::MissingField {
            modifier: name.to_string(),
            field: "parameter",
        })?;
        let value = config.value.as_ref().ok_or_else(|| Error::MissingField {
            modifier: name.to_string(),
            field: "value",
        })?;
        let affected = affected_subpops(name, config.subpop.as_ref(), ctx)?;
        let groups = SpatialGroups::resolve(name, config.subpop_groups.as_ref(), &affected)?;
        let period = Period::new(
            config.period_start_date.unwrap_or(ctx.span.start),
            config.period_end_date.unwrap_or(ctx.span.end),
        );
        let plan = GroupPlan {
            groups,
            periods: vec![period],
        };
        PeriodModifier::build(name, parameter, value, vec![plan], ctx, rng).map(Self)
    }
}

impl Deref for SinglePeriodModifier {
    type Target = PeriodModifier;

    fn deref(&self) -> &PeriodModifier {
        &self.0
    }
}
