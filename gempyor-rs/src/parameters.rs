//! Model parameters: drawing base (day × subpop) series, persisting scalar
//! draws, and applying a modifier tree to them before integration.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use log::{info, warn};
use nalgebra::DMatrix;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ParameterConfig;
use crate::distribution::ValueSpec;
use crate::error::{Error, Result};
use crate::modifiers::ModifierBase;
use crate::overlap::{OverlapMethod, OverlapMethods, normalize_parameter_name, reduce_parameter};
use crate::time::{TimeSpan, parse_date, resample_daily};

#[derive(Debug, Clone)]
enum Source {
    Value(ValueSpec),
    Timeseries(DMatrix<f64>),
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub method: OverlapMethod,
    pub rolling_mean_window: Option<usize>,
    source: Source,
}

impl Parameter {
    pub fn is_timeseries(&self) -> bool {
        matches!(self.source, Source::Timeseries(_))
    }
}

/// Parameter values, one (day × subpop) matrix per parameter, in the same
/// order as [`Parameters::names`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterTensor {
    pub names: Vec<String>,
    pub values: Vec<DMatrix<f64>>,
}

impl ParameterTensor {
    pub fn get(&self, name: &str) -> Option<&DMatrix<f64>> {
        let name = normalize_parameter_name(name);
        self.names
            .iter()
            .position(|n| normalize_parameter_name(n) == name)
            .map(|i| &self.values[i])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRecord {
    pub parameter: String,
    pub value: f64,
}

/// Scalar draws of a slot, written next to the modifier metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterTable {
    pub records: Vec<ParameterRecord>,
}

impl ParameterTable {
    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let records = reader
            .deserialize()
            .collect::<std::result::Result<Vec<ParameterRecord>, _>>()?;
        Ok(Self { records })
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        self.to_writer(csv::Writer::from_path(path)?)
    }

    pub fn to_writer<W: io::Write>(&self, mut writer: csv::Writer<W>) -> Result<()> {
        if self.records.is_empty() {
            writer.write_record(["parameter", "value"])?;
        }
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn get(&self, name: &str) -> Option<f64> {
        let name = normalize_parameter_name(name);
        self.records
            .iter()
            .find(|r| normalize_parameter_name(&r.parameter) == name)
            .map(|r| r.value)
    }
}

#[derive(Debug, Clone)]
pub struct Parameters {
    params: Vec<Parameter>,
    span: TimeSpan,
    n_subpops: usize,
}

impl Parameters {
    pub fn new(
        configs: &BTreeMap<String, ParameterConfig>,
        span: TimeSpan,
        subpops: &[String],
    ) -> Result<Self> {
        let mut params = Vec::with_capacity(configs.len());
        for (name, config) in configs {
            let source = match (&config.value, &config.timeseries) {
                (Some(value), None) => {
                    value.validate()?;
                    Source::Value(value.clone())
                }
                (None, Some(path)) => Source::Timeseries(load_timeseries(path, &span, subpops)?),
                _ => {
                    return Err(Error::InvalidConfig(format!(
                        "parameter {name} needs exactly one of value or timeseries"
                    )));
                }
            };
            if config.rolling_mean_windows == Some(0) {
                return Err(Error::InvalidConfig(format!(
                    "parameter {name} has a zero-day rolling mean window"
                )));
            }
            params.push(Parameter {
                name: name.clone(),
                method: config.stacked_modifier_method.unwrap_or_default(),
                rolling_mean_window: config.rolling_mean_windows,
                source,
            });
        }
        Ok(Self {
            params,
            span,
            n_subpops: subpops.len(),
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    /// Sum / reduction-product partition declared by the parameters.
    pub fn overlap_methods(&self) -> Result<OverlapMethods> {
        let mut methods = OverlapMethods::default();
        for param in &self.params {
            methods.insert(&param.name, param.method)?;
        }
        Ok(methods)
    }

    /// Fresh base values: one draw per scalar parameter, broadcast over
    /// every day and subpop.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ParameterTensor> {
        self.build_tensor(|_, spec, rng| spec.sample(rng), rng)
    }

    /// Base values reusing a previous slot's scalar draws; parameters absent
    /// from `table` are drawn fresh.
    pub fn load<R: Rng + ?Sized>(
        &self,
        table: &ParameterTable,
        rng: &mut R,
    ) -> Result<ParameterTensor> {
        self.build_tensor(
            |name, spec, rng| match table.get(name) {
                Some(value) => Ok(value),
                None => {
                    warn!("parameter {name} is absent from the loaded draws; drawing it");
                    spec.sample(rng)
                }
            },
            rng,
        )
    }

    fn build_tensor<R, F>(&self, mut scalar: F, rng: &mut R) -> Result<ParameterTensor>
    where
        R: Rng + ?Sized,
        F: FnMut(&str, &ValueSpec, &mut R) -> Result<f64>,
    {
        let (days, subpops) = (self.span.n_days(), self.n_subpops);
        let mut values = Vec::with_capacity(self.params.len());
        for param in &self.params {
            let matrix = match &param.source {
                Source::Value(spec) => {
                    DMatrix::from_element(days, subpops, scalar(&param.name, spec, rng)?)
                }
                Source::Timeseries(series) => series.clone(),
            };
            values.push(matrix);
        }
        Ok(ParameterTensor {
            names: self.names(),
            values,
        })
    }

    /// Scalar draws of `tensor` (timeseries parameters are not persisted).
    pub fn to_table(&self, tensor: &ParameterTensor) -> ParameterTable {
        let records = self
            .params
            .iter()
            .zip(&tensor.values)
            .filter(|(p, _)| !p.is_timeseries())
            .filter_map(|(p, m)| {
                m.iter().next().map(|v| ParameterRecord {
                    parameter: p.name.clone(),
                    value: *v,
                })
            })
            .collect();
        ParameterTable { records }
    }

    /// Apply `modifier` to every parameter it touches, then smooth parameters
    /// that declare a rolling mean. The overlap rule comes from the
    /// modifier's own partition, the one its stack was combined with, so
    /// section-level overrides apply to the base parameter too.
    pub fn reduce<M: ModifierBase + ?Sized>(
        &self,
        tensor: &ParameterTensor,
        modifier: Option<&M>,
    ) -> Result<ParameterTensor> {
        if tensor.values.len() != self.params.len() {
            return Err(Error::ShapeMismatch {
                what: "parameter tensor".to_string(),
                expected: (self.params.len(), 0),
                got: (tensor.values.len(), 0),
            });
        }
        let mut reduced = tensor.clone();
        for (idx, param) in self.params.iter().enumerate() {
            if let Some(modifier) = modifier {
                let key = normalize_parameter_name(&param.name);
                if modifier.touches(&key) {
                    let method = modifier.overlap().method_for(&key);
                    info!("reducing {} with {} ({method:?})", param.name, modifier.name());
                    reduced.values[idx] = reduce_parameter(
                        &tensor.values[idx],
                        &modifier.get_reduction(&key),
                        method,
                    )?;
                }
            }
            if let Some(window) = param.rolling_mean_window {
                reduced.values[idx] = rolling_mean_pad(&reduced.values[idx], window);
            }
        }
        Ok(reduced)
    }
}

/// Centered rolling mean over rows (days), padding each end with its edge
/// value so the output keeps the input's length. Even windows lean one day
/// into the past.
pub fn rolling_mean_pad(data: &DMatrix<f64>, window: usize) -> DMatrix<f64> {
    let n = data.nrows();
    if window <= 1 || n == 0 {
        return data.clone();
    }
    let half = window / 2;
    let mut out = DMatrix::zeros(n, data.ncols());
    for col in 0..data.ncols() {
        for t in 0..n {
            let sum: f64 = (0..window)
                .map(|k| {
                    let idx = (t + k).saturating_sub(half).min(n - 1);
                    data[(idx, col)]
                })
                .sum();
            out[(t, col)] = sum / window as f64;
        }
    }
    out
}

/// Read a `date,<subpop>...` CSV (or `date,<value>` broadcast to every
/// subpop) and forward-fill it to daily resolution over `span`.
fn load_timeseries(path: &Path, span: &TimeSpan, subpops: &[String]) -> Result<DMatrix<f64>> {
    let invalid = |reason: String| Error::InvalidTimeseries {
        path: path.display().to_string(),
        reason,
    };
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(invalid("expected a date column and at least one value column".to_string()));
    }
    let columns: Vec<usize> = if headers.len() == 2 && !subpops.iter().any(|s| s == &headers[1]) {
        vec![1; subpops.len()]
    } else {
        subpops
            .iter()
            .map(|s| {
                headers
                    .iter()
                    .position(|h| h == s)
                    .ok_or_else(|| invalid(format!("no column for subpop {s}")))
            })
            .collect::<Result<_>>()?
    };

    let mut dates = Vec::new();
    let mut values = Vec::new();
    for row in reader.records() {
        let row = row?;
        dates.push(parse_date(&row[0])?);
        for &c in &columns {
            let value: f64 = row[c]
                .trim()
                .parse()
                .map_err(|e| invalid(format!("row {}: {e}", dates.len())))?;
            values.push(value);
        }
    }
    let series = DMatrix::from_row_slice(dates.len(), subpops.len(), &values);
    resample_daily(&dates, &series, span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModifierConfig;
    use crate::modifiers::{Modifier, ModifierContext};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use rand::{SeedableRng, rngs::StdRng};
    use serde_json::json;
    use std::io::Write;

    fn span() -> TimeSpan {
        TimeSpan::new(
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 1, 10).unwrap(),
        )
        .unwrap()
    }

    fn subpops() -> Vec<String> {
        vec!["A".to_string(), "B".to_string()]
    }

    fn configs() -> BTreeMap<String, ParameterConfig> {
        serde_json::from_value(json!({
            "beta": {"value": 0.8, "stacked_modifier_method": "reduction_product"},
            "gamma": {"value": {"distribution": "uniform", "low": 0.1, "high": 0.3},
                      "stacked_modifier_method": "sum"},
            "sigma": {"value": 0.25}
        }))
        .unwrap()
    }

    #[test]
    fn test_draw_broadcasts_scalars() {
        let params = Parameters::new(&configs(), span(), &subpops()).unwrap();
        let tensor = params.draw(&mut StdRng::seed_from_u64(4)).unwrap();
        assert_eq!(tensor.names, vec!["beta", "gamma", "sigma"]);
        let gamma = tensor.get("gamma").unwrap();
        assert_eq!(gamma.shape(), (10, 2));
        assert!(gamma.iter().all(|v| *v == gamma[(0, 0)]));
        assert!((0.1..0.3).contains(&gamma[(0, 0)]));
    }

    #[test]
    fn test_overlap_methods_from_config() {
        let params = Parameters::new(&configs(), span(), &subpops()).unwrap();
        let methods = params.overlap_methods().unwrap();
        assert_eq!(methods.method_for("beta"), OverlapMethod::ReductionProduct);
        assert_eq!(methods.method_for("gamma"), OverlapMethod::Sum);
        assert_eq!(methods.method_for("sigma"), OverlapMethod::Product);
    }

    #[test]
    fn test_table_round_trip_reproduces_draws() {
        let params = Parameters::new(&configs(), span(), &subpops()).unwrap();
        let drawn = params.draw(&mut StdRng::seed_from_u64(4)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spar.csv");
        params.to_table(&drawn).write_csv(&path).unwrap();
        let table = ParameterTable::read_csv(&path).unwrap();
        let loaded = params.load(&table, &mut StdRng::seed_from_u64(5)).unwrap();
        assert_eq!(loaded, drawn);
    }

    #[test]
    fn test_reduce_uses_each_parameters_rule() {
        let params = Parameters::new(&configs(), span(), &subpops()).unwrap();
        let tensor = params.draw(&mut StdRng::seed_from_u64(4)).unwrap();
        let gamma0 = tensor.get("gamma").unwrap()[(0, 0)];

        let library: BTreeMap<String, ModifierConfig> = serde_json::from_value(json!({
            "b": {"method": "SinglePeriodModifier", "parameter": "beta", "value": 0.25,
                  "period_start_date": "2020-01-02", "period_end_date": "2020-01-03"},
            "g": {"method": "SinglePeriodModifier", "parameter": "gamma", "value": 0.1,
                  "subpop": "B"},
            "s": {"method": "SinglePeriodModifier", "parameter": "sigma", "value": 2.0,
                  "subpop": ["A"]},
            "all": {"method": "StackedModifier", "modifiers": ["b", "g", "s"]}
        }))
        .unwrap();
        let subpops = subpops();
        let overlap = params.overlap_methods().unwrap();
        let ctx = ModifierContext::new(span(), &subpops, overlap, &library);
        let modifier = Modifier::from_library("all", &ctx, &mut StdRng::seed_from_u64(0)).unwrap();
        let reduced = params.reduce(&tensor, Some(&modifier)).unwrap();

        let beta = reduced.get("beta").unwrap();
        assert_relative_eq!(beta[(0, 0)], 0.8);
        assert_relative_eq!(beta[(1, 0)], 0.6);
        assert_relative_eq!(beta[(2, 1)], 0.6);
        assert_relative_eq!(beta[(3, 1)], 0.8);

        let gamma = reduced.get("gamma").unwrap();
        assert_relative_eq!(gamma[(5, 0)], gamma0);
        assert_relative_eq!(gamma[(5, 1)], gamma0 + 0.1);

        let sigma = reduced.get("sigma").unwrap();
        assert_relative_eq!(sigma[(0, 0)], 0.5);
        assert_relative_eq!(sigma[(0, 1)], 0.25);
    }

    #[test]
    fn test_stacked_and_sequential_reduction_agree() {
        let params = Parameters::new(&configs(), span(), &subpops()).unwrap();
        let tensor = params.draw(&mut StdRng::seed_from_u64(4)).unwrap();
        let library: BTreeMap<String, ModifierConfig> = serde_json::from_value(json!({
            "b1": {"method": "SinglePeriodModifier", "parameter": "beta", "value": 0.25},
            "b2": {"method": "SinglePeriodModifier", "parameter": "beta", "value": 0.5,
                   "period_start_date": "2020-01-05", "period_end_date": "2020-01-10"},
            "both": {"method": "StackedModifier", "modifiers": ["b1", "b2"]}
        }))
        .unwrap();
        let subpops = subpops();
        let overlap = params.overlap_methods().unwrap();
        let ctx = ModifierContext::new(span(), &subpops, overlap, &library);
        let mut rng = StdRng::seed_from_u64(0);
        let stacked = Modifier::from_library("both", &ctx, &mut rng).unwrap();
        let b1 = Modifier::from_library("b1", &ctx, &mut rng).unwrap();
        let b2 = Modifier::from_library("b2", &ctx, &mut rng).unwrap();

        let at_once = params.reduce(&tensor, Some(&stacked)).unwrap();
        let one_by_one = params
            .reduce(&params.reduce(&tensor, Some(&b1)).unwrap(), Some(&b2))
            .unwrap();
        let (x, y) = (at_once.get("beta").unwrap(), one_by_one.get("beta").unwrap());
        for (a, b) in x.iter().zip(y.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rolling_mean_pads_edges() {
        let data = DMatrix::from_column_slice(5, 1, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        let smoothed = rolling_mean_pad(&data, 3);
        assert_relative_eq!(smoothed[(0, 0)], 4.0 / 3.0);
        assert_relative_eq!(smoothed[(2, 0)], 3.0);
        assert_relative_eq!(smoothed[(4, 0)], 14.0 / 3.0);

        let flat = DMatrix::from_element(6, 2, 7.0);
        assert_eq!(rolling_mean_pad(&flat, 4), flat);
        assert_eq!(rolling_mean_pad(&data, 1), data);
    }

    #[test]
    fn test_rolling_mean_applied_after_reduction() {
        let configs: BTreeMap<String, ParameterConfig> = serde_json::from_value(json!({
            "sigma": {"value": 1.0, "rolling_mean_windows": 3}
        }))
        .unwrap();
        let params = Parameters::new(&configs, span(), &subpops()).unwrap();
        let tensor = params.draw(&mut StdRng::seed_from_u64(0)).unwrap();
        let library: BTreeMap<String, ModifierConfig> = serde_json::from_value(json!({
            "s": {"method": "SinglePeriodModifier", "parameter": "sigma", "value": 0.0,
                  "period_start_date": "2020-01-05", "period_end_date": "2020-01-05"}
        }))
        .unwrap();
        let subpops = subpops();
        let overlap = params.overlap_methods().unwrap();
        let ctx = ModifierContext::new(span(), &subpops, overlap, &library);
        let modifier = Modifier::from_library("s", &ctx, &mut StdRng::seed_from_u64(0)).unwrap();
        let reduced = params.reduce(&tensor, Some(&modifier)).unwrap();
        let sigma = reduced.get("sigma").unwrap();
        assert_relative_eq!(sigma[(3, 0)], 2.0 / 3.0);
        assert_relative_eq!(sigma[(4, 0)], 2.0 / 3.0);
        assert_relative_eq!(sigma[(0, 0)], 1.0);
    }

    #[test]
    fn test_timeseries_broadcast_and_per_subpop() {
        let dir = tempfile::tempdir().unwrap();
        let broadcast = dir.path().join("beta.csv");
        let mut f = std::fs::File::create(&broadcast).unwrap();
        writeln!(f, "date,value\n2020-01-01,0.5\n2020-01-06,0.7").unwrap();
        let per_subpop = dir.path().join("gamma.csv");
        let mut f = std::fs::File::create(&per_subpop).unwrap();
        writeln!(f, "date,B,A\n2020-01-01,2.0,1.0").unwrap();

        let configs: BTreeMap<String, ParameterConfig> = serde_json::from_value(json!({
            "beta": {"timeseries": broadcast},
            "gamma": {"timeseries": per_subpop}
        }))
        .unwrap();
        let params = Parameters::new(&configs, span(), &subpops()).unwrap();
        let tensor = params.draw(&mut StdRng::seed_from_u64(0)).unwrap();
        let beta = tensor.get("beta").unwrap();
        assert_eq!(beta[(4, 1)], 0.5);
        assert_eq!(beta[(5, 0)], 0.7);
        let gamma = tensor.get("gamma").unwrap();
        assert_eq!(gamma[(9, 0)], 1.0);
        assert_eq!(gamma[(9, 1)], 2.0);
        assert!(params.to_table(&tensor).records.is_empty());
    }

    #[test]
    fn test_value_or_timeseries_required() {
        let configs: BTreeMap<String, ParameterConfig> =
            serde_json::from_value(json!({"beta": {}})).unwrap();
        assert!(Parameters::new(&configs, span(), &subpops()).is_err());
    }
}
