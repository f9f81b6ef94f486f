//! Random-distribution specs used for modifier values and parameter draws.
//!
//! A value is either a bare number (a fixed value) or a table tagged by
//! `distribution`:
//!
//! ```toml
//! value = { distribution = "truncnorm", mean = 0.6, sd = 0.1, a = 0.0, b = 0.9 }
//! ```

use rand::Rng;
use rand_distr::{Binomial, Distribution as _, LogNormal, Poisson, Uniform};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSpec {
    Fixed(f64),
    Distribution(Distribution),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "distribution", rename_all = "lowercase")]
pub enum Distribution {
    Fixed { value: f64 },
    Uniform { low: f64, high: f64 },
    Poisson { lam: f64 },
    Binomial { n: u64, p: f64 },
    Truncnorm { mean: f64, sd: f64, a: f64, b: f64 },
    Lognorm { meanlog: f64, sdlog: f64 },
}

impl ValueSpec {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64> {
        match self {
            ValueSpec::Fixed(value) => Ok(*value),
            ValueSpec::Distribution(d) => d.sample(rng),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ValueSpec::Fixed(value) if value.is_finite() => Ok(()),
            ValueSpec::Fixed(value) => Err(Error::InvalidDistribution(format!(
                "fixed value must be finite, got {value}"
            ))),
            ValueSpec::Distribution(d) => d.validate(),
        }
    }
}

impl Distribution {
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| Err(Error::InvalidDistribution(reason));
        match *self {
            Distribution::Fixed { value } if !value.is_finite() => {
                fail(format!("fixed value must be finite, got {value}"))
            }
            Distribution::Uniform { low, high } if !(low < high) => {
                fail(format!("uniform requires low < high, got [{low}, {high})"))
            }
            Distribution::Poisson { lam } if !(lam > 0.0 && lam.is_finite()) => {
                fail(format!("poisson requires lam > 0, got {lam}"))
            }
            Distribution::Binomial { p, .. } if !(0.0..=1.0).contains(&p) => {
                fail(format!("binomial p must be in [0, 1], got {p}"))
            }
            Distribution::Truncnorm { sd, a, b, .. } if !(sd > 0.0 && a < b) => {
                fail(format!("truncnorm requires sd > 0 and a < b, got sd={sd} a={a} b={b}"))
            }
            Distribution::Lognorm { sdlog, .. } if !(sdlog > 0.0) => {
                fail(format!("lognorm requires sdlog > 0, got {sdlog}"))
            }
            _ => Ok(()),
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64> {
        self.validate()?;
        let invalid = |e: &dyn std::fmt::Display| Error::InvalidDistribution(e.to_string());
        let value = match *self {
            Distribution::Fixed { value } => value,
            Distribution::Uniform { low, high } => {
                Uniform::new(low, high).map_err(|e| invalid(&e))?.sample(rng)
            }
            Distribution::Poisson { lam } => {
                Poisson::new(lam).map_err(|e| invalid(&e))?.sample(rng)
            }
            Distribution::Binomial { n, p } => {
                Binomial::new(n, p).map_err(|e| invalid(&e))?.sample(rng) as f64
            }
            Distribution::Truncnorm { mean, sd, a, b } => {
                // Inverse-CDF sampling stays exact in the far tails, where
                // rejection sampling would stall.
                let normal = Normal::new(mean, sd).map_err(|e| invalid(&e))?;
                let (lo, hi) = (normal.cdf(a), normal.cdf(b));
                if !(hi > lo) {
                    return Err(Error::InvalidDistribution(format!(
                        "truncnorm interval [{a}, {b}] has no mass under N({mean}, {sd})"
                    )));
                }
                let u: f64 = rng.random_range(lo..hi);
                normal.inverse_cdf(u).clamp(a, b)
            }
            Distribution::Lognorm { meanlog, sdlog } => {
                LogNormal::new(meanlog, sdlog).map_err(|e| invalid(&e))?.sample(rng)
            }
        };
        Ok(value)
    }
}
