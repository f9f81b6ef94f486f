use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, info, warn};
use nalgebra::DMatrix;
use rand::Rng;

use super::{ModifierBase, ModifierContext};
use crate::config::SubpopSelection;
use crate::distribution::ValueSpec;
use crate::error::{Error, Result};
use crate::overlap::{OverlapMethods, normalize_parameter_name};
use crate::spatial::{SpatialGroups, group_key};
use crate::table::{ModifierRecord, ModifierTable};
use crate::time::{Period, join_dates};

/// Periods and drawn value applied to one subpop. Members of a group carry
/// identical copies.
#[derive(Debug, Clone, PartialEq)]
pub struct SubpopDraw {
    pub periods: Vec<Period>,
    pub reduction: f64,
}

/// One `groups:` entry resolved against the subpop universe.
#[derive(Debug, Clone)]
pub(crate) struct GroupPlan {
    pub groups: SpatialGroups,
    pub periods: Vec<Period>,
}

/// Shared core of the single- and multi-period modifiers: one parameter, a
/// list of spatial partitions each with their own periods, one draw per
/// spatial unit.
#[derive(Debug, Clone)]
pub struct PeriodModifier {
    name: String,
    param_name: String,
    partitions: Vec<SpatialGroups>,
    draws: BTreeMap<String, SubpopDraw>,
    reduction: DMatrix<f64>,
    overlap: Arc<OverlapMethods>,
}

impl PeriodModifier {
    pub(crate) fn build<R: Rng + ?Sized>(
        name: &str,
        parameter: &str,
        value: &ValueSpec,
        plans: Vec<GroupPlan>,
        ctx: &ModifierContext<'_>,
        rng: &mut R,
    ) -> Result<Self> {
        value.validate()?;
        check_disjoint(name, &plans)?;
        if ctx.loaded.is_some_and(|l| !l.contains_modifier(name)) {
            info!("{name}: absent from the loaded draws; drawing it fresh");
        }

        let param_name = normalize_parameter_name(parameter);
        let method = ctx.overlap.method_for(&param_name);
        let mut draws = BTreeMap::new();
        for plan in &plans {
            for unit in plan.groups.units() {
                let key = group_key(unit);
                let draw = match ctx.loaded.and_then(|l| l.get(name, &key)) {
                    Some(record) => {
                        debug!("{name}: reloaded {key} = {}", record.reduction);
                        SubpopDraw {
                            periods: record.periods()?,
                            reduction: record.reduction,
                        }
                    }
                    None => {
                        let reduction = value.sample(rng)?;
                        debug!("{name}: drew {key} = {reduction}");
                        SubpopDraw {
                            periods: plan.periods.clone(),
                            reduction,
                        }
                    }
                };
                check_periods(name, &draw.periods, ctx)?;
                if ctx.lint_reductions && !(0.0..=1.0).contains(&draw.reduction) {
                    warn!(
                        "{name}: reduction {} for {key} on {param_name} is outside [0, 1]",
                        draw.reduction
                    );
                }
                for subpop in unit {
                    draws.insert(subpop.clone(), draw.clone());
                }
            }
        }

        let (rows, cols) = ctx.shape();
        let neutral = method.neutral_reduction();
        let mut reduction = DMatrix::from_element(rows, cols, neutral);
        for (subpop, draw) in &draws {
            let row = ctx.subpop_index(subpop).ok_or_else(|| Error::UnknownSubpop {
                modifier: name.to_string(),
                subpop: subpop.clone(),
            })?;
            for period in &draw.periods {
                if let Some(columns) = period.columns(&ctx.span) {
                    for col in columns {
                        reduction[(row, col)] = draw.reduction;
                    }
                }
            }
        }
        if reduction.iter().all(|v| *v == neutral) {
            warn!("modifier {name} does nothing: {param_name} is neutral everywhere");
        }

        Ok(Self {
            name: name.to_string(),
            param_name,
            partitions: plans.into_iter().map(|p| p.groups).collect(),
            draws,
            reduction,
            overlap: Arc::clone(&ctx.overlap),
        })
    }

    pub fn param_name(&self) -> &str {
        &self.param_name
    }

    /// Per-subpop draws, one entry per affected subpop.
    pub fn draws(&self) -> &BTreeMap<String, SubpopDraw> {
        &self.draws
    }

    pub fn partitions(&self) -> &[SpatialGroups] {
        &self.partitions
    }
}

impl ModifierBase for PeriodModifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn param_names(&self) -> Vec<&str> {
        vec![self.param_name.as_str()]
    }

    fn leaf_names(&self) -> Vec<&str> {
        vec![self.name.as_str()]
    }

    fn reduction(&self, param: &str) -> Option<&DMatrix<f64>> {
        (param == self.param_name).then_some(&self.reduction)
    }

    fn overlap(&self) -> &OverlapMethods {
        &self.overlap
    }

    fn shape(&self) -> (usize, usize) {
        self.reduction.shape()
    }

    /// One row per ungrouped subpop and one per group, partition by
    /// partition.
    fn get_reductions_to_write(&self) -> Result<ModifierTable> {
        let mut records = Vec::new();
        for partition in &self.partitions {
            for unit in partition.units() {
                let Some(draw) = unit.first().and_then(|s| self.draws.get(s)) else {
                    continue;
                };
                records.push(ModifierRecord {
                    subpop: group_key(unit),
                    modifier_name: self.name.clone(),
                    start_date: join_dates(draw.periods.iter().map(|p| &p.start_date)),
                    end_date: join_dates(draw.periods.iter().map(|p| &p.end_date)),
                    parameter: self.param_name.clone(),
                    reduction: draw.reduction,
                });
            }
        }
        Ok(ModifierTable::new(records))
    }
}

/// Resolve a `subpop` field: absent or `"all"` means every subpop.
pub(crate) fn affected_subpops(
    modifier: &str,
    selection: Option<&SubpopSelection>,
    ctx: &ModifierContext<'_>,
) -> Result<Vec<String>> {
    let requested: Vec<String> = match selection {
        None => return Ok(ctx.subpops.to_vec()),
        Some(SubpopSelection::Keyword(word)) if word == "all" => return Ok(ctx.subpops.to_vec()),
        Some(SubpopSelection::Keyword(subpop)) => vec![subpop.clone()],
        Some(SubpopSelection::List(list)) => list.clone(),
    };
    let mut seen = BTreeSet::new();
    let mut affected = Vec::with_capacity(requested.len());
    for subpop in requested {
        if ctx.subpop_index(&subpop).is_none() {
            return Err(Error::UnknownSubpop {
                modifier: modifier.to_string(),
                subpop,
            });
        }
        if seen.insert(subpop.clone()) {
            affected.push(subpop);
        }
    }
    Ok(affected)
}

fn check_disjoint(modifier: &str, plans: &[GroupPlan]) -> Result<()> {
    let mut seen = BTreeSet::new();
    let mut repeated = BTreeSet::new();
    for subpop in plans.iter().flat_map(|p| p.groups.members()) {
        if !seen.insert(subpop) {
            repeated.insert(subpop.to_string());
        }
    }
    if repeated.is_empty() {
        Ok(())
    } else {
        Err(Error::OverlappingGroups {
            modifier: modifier.to_string(),
            subpops: repeated.into_iter().collect(),
        })
    }
}

fn check_periods(modifier: &str, periods: &[Period], ctx: &ModifierContext<'_>) -> Result<()> {
    for period in periods {
        if period.start_date > period.end_date {
            return Err(Error::InvertedPeriod {
                modifier: modifier.to_string(),
                start: period.start_date,
                end: period.end_date,
            });
        }
        let inside = ctx.span.contains(period.start_date) && ctx.span.contains(period.end_date);
        if ctx.sanitize && !inside {
            return Err(Error::PeriodOutOfRange {
                modifier: modifier.to_string(),
                start: period.start_date,
                end: period.end_date,
                span_start: ctx.span.start,
                span_end: ctx.span.end,
            });
        }
    }
    Ok(())
}
