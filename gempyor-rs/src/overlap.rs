//! The three overlap-resolution rules and the parameter partition they apply
//! to. Stacked modifiers combine their children with the same algebra that
//! [`reduce_parameter`] uses against a base parameter, so stacking two
//! modifiers is equivalent to applying them one after the other.

use std::collections::BTreeSet;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapMethod {
    Sum,
    ReductionProduct,
    #[default]
    Product,
}

impl OverlapMethod {
    /// Accumulator seed when a stack first sees a parameter.
    pub fn identity(self) -> f64 {
        match self {
            OverlapMethod::Sum => 0.0,
            OverlapMethod::ReductionProduct | OverlapMethod::Product => 1.0,
        }
    }

    /// Reduction that leaves a parameter unchanged under [`reduce_parameter`].
    pub fn neutral_reduction(self) -> f64 {
        match self {
            OverlapMethod::Sum | OverlapMethod::ReductionProduct => 0.0,
            OverlapMethod::Product => 1.0,
        }
    }

    /// Fold one more reduction into a stack accumulator.
    pub fn accumulate(self, acc: &mut DMatrix<f64>, reduction: &DMatrix<f64>) {
        match self {
            OverlapMethod::Sum => *acc += reduction,
            OverlapMethod::ReductionProduct => acc.zip_apply(reduction, |a, r| *a *= 1.0 - r),
            OverlapMethod::Product => acc.component_mul_assign(reduction),
        }
    }

    /// Turn a finished accumulator into a net reduction.
    pub fn finalize(self, acc: &mut DMatrix<f64>) {
        if self == OverlapMethod::ReductionProduct {
            acc.apply(|a| *a = 1.0 - *a);
        }
    }

    pub fn apply(self, base: f64, reduction: f64) -> f64 {
        match self {
            OverlapMethod::Sum => base + reduction,
            OverlapMethod::ReductionProduct => base * (1.0 - reduction),
            OverlapMethod::Product => base * reduction,
        }
    }
}

/// Lowercased, whitespace-free parameter name used for every lookup.
pub fn normalize_parameter_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Partition of parameter names into overlap classes; anything not listed is
/// `product`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlapMethods {
    sum: BTreeSet<String>,
    reduction_product: BTreeSet<String>,
}

impl OverlapMethods {
    pub fn new<S: AsRef<str>>(
        sum: impl IntoIterator<Item = S>,
        reduction_product: impl IntoIterator<Item = S>,
    ) -> Result<Self> {
        let mut methods = Self::default();
        for name in sum {
            methods.insert(name.as_ref(), OverlapMethod::Sum)?;
        }
        for name in reduction_product {
            methods.insert(name.as_ref(), OverlapMethod::ReductionProduct)?;
        }
        Ok(methods)
    }

    pub fn insert(&mut self, name: &str, method: OverlapMethod) -> Result<()> {
        let name = normalize_parameter_name(name);
        let current = self.method_for(&name);
        if current != OverlapMethod::Product && current != method {
            return Err(Error::InvalidConfig(format!(
                "parameter {name} is declared with both {current:?} and {method:?} overlap methods"
            )));
        }
        match method {
            OverlapMethod::Sum => self.sum.insert(name),
            OverlapMethod::ReductionProduct => self.reduction_product.insert(name),
            OverlapMethod::Product => false,
        };
        Ok(())
    }

    pub fn merge(&mut self, other: &OverlapMethods) -> Result<()> {
        for name in &other.sum {
            self.insert(name, OverlapMethod::Sum)?;
        }
        for name in &other.reduction_product {
            self.insert(name, OverlapMethod::ReductionProduct)?;
        }
        Ok(())
    }

    pub fn method_for(&self, name: &str) -> OverlapMethod {
        let name = normalize_parameter_name(name);
        if self.sum.contains(&name) {
            OverlapMethod::Sum
        } else if self.reduction_product.contains(&name) {
            OverlapMethod::ReductionProduct
        } else {
            OverlapMethod::Product
        }
    }

    pub fn sum(&self) -> &BTreeSet<String> {
        &self.sum
    }

    pub fn reduction_product(&self) -> &BTreeSet<String> {
        &self.reduction_product
    }
}

/// Combine a base parameter (day × subpop) with a modifier's dense reduction
/// (subpop × day).
pub fn reduce_parameter(
    param: &DMatrix<f64>,
    modification: &DMatrix<f64>,
    method: OverlapMethod,
) -> Result<DMatrix<f64>> {
    let modification = modification.transpose();
    if modification.shape() != param.shape() {
        return Err(Error::ShapeMismatch {
            what: "parameter reduction".to_string(),
            expected: param.shape(),
            got: modification.shape(),
        });
    }
    Ok(param.zip_map(&modification, |p, r| method.apply(p, r)))
}
