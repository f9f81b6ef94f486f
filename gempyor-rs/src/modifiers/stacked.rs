use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{info, warn};
use nalgebra::DMatrix;
use rand::Rng;

use super::{Modifier, ModifierBase, ModifierContext};
use crate::config::{ModifierConfig, ModifierRef};
use crate::error::{Error, ErrorKind, Result};
use crate::overlap::OverlapMethods;
use crate::table::ModifierTable;

/// Metadata kept for writing. Once the row cap is crossed everything retained
/// is dropped and writing fails for the lifetime of the modifier.
#[derive(Debug, Clone)]
enum StackMetadata {
    Retaining { tables: Vec<ModifierTable>, rows: usize },
    CapExceeded { cap: usize },
}

impl StackMetadata {
    fn retain(&mut self, stack: &str, written: Result<ModifierTable>, cap: usize) -> Result<()> {
        let table = match written {
            Ok(table) => table,
            Err(e) if e.kind() == ErrorKind::CapacityExceeded => {
                *self = StackMetadata::CapExceeded { cap };
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let exceeded = match self {
            StackMetadata::Retaining { rows, .. } => *rows + table.len() > cap,
            StackMetadata::CapExceeded { .. } => return Ok(()),
        };
        if exceeded {
            warn!("stack {stack} exceeds {cap} metadata rows; it can no longer be written");
            *self = StackMetadata::CapExceeded { cap };
        } else if let StackMetadata::Retaining { tables, rows } = self {
            *rows += table.len();
            tables.push(table);
        }
        Ok(())
    }
}

/// Composition of other modifiers. Each parameter touched anywhere in the
/// stack is combined across children with its overlap rule.
#[derive(Debug, Clone)]
pub struct StackedModifier {
    name: String,
    param_names: Vec<String>,
    reductions: BTreeMap<String, DMatrix<f64>>,
    leaf_names: Vec<String>,
    metadata: StackMetadata,
    overlap: Arc<OverlapMethods>,
    shape: (usize, usize),
}

impl StackedModifier {
    pub(crate) fn new<R: Rng + ?Sized>(
        name: &str,
        config: &ModifierConfig,
        ctx: &ModifierContext<'_>,
        ancestors: &mut Vec<String>,
        rng: &mut R,
    ) -> Result<Self> {
        let refs = config
            .modifiers
            .as_deref()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| Error::MissingField {
                modifier: name.to_string(),
                field: "modifiers",
            })?;
        if ancestors.iter().any(|a| a == name) {
            return Err(Error::InvalidConfig(format!(
                "stacked modifier {name} includes itself through {}",
                ancestors.join(" -> ")
            )));
        }
        ancestors.push(name.to_string());

        let shape = ctx.shape();
        let cap = ctx.stack_limits.max_rows;
        let mut param_names: Vec<String> = Vec::new();
        let mut reductions: BTreeMap<String, DMatrix<f64>> = BTreeMap::new();
        let mut seen = BTreeSet::new();
        let mut leaf_names = Vec::new();
        let mut metadata = StackMetadata::Retaining {
            tables: Vec::new(),
            rows: 0,
        };

        for (i, entry) in refs.iter().enumerate() {
            let sub = match entry {
                ModifierRef::Name(sub_name) => {
                    Modifier::build_named(sub_name, ctx, ancestors, rng)?
                }
                ModifierRef::Inline(sub_config) => {
                    let sub_name = sub_config
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("{name}_{i}"));
                    Modifier::build(&sub_name, sub_config, ctx, ancestors, rng)?
                }
            };

            for leaf in sub.leaf_names() {
                if !seen.insert(leaf.to_string()) {
                    return Err(Error::DuplicateModifier {
                        stack: name.to_string(),
                        name: leaf.to_string(),
                    });
                }
                leaf_names.push(leaf.to_string());
            }

            for param in sub.param_names() {
                if !reductions.contains_key(param) {
                    let identity = ctx.overlap.method_for(param).identity();
                    let start = DMatrix::from_element(shape.0, shape.1, identity);
                    reductions.insert(param.to_string(), start);
                    param_names.push(param.to_string());
                }
            }
            for (param, acc) in reductions.iter_mut() {
                ctx.overlap.method_for(param).accumulate(acc, &sub.get_reduction(param));
            }

            metadata.retain(name, sub.get_reductions_to_write(), cap)?;
        }

        for (param, acc) in reductions.iter_mut() {
            ctx.overlap.method_for(param).finalize(acc);
        }
        ancestors.pop();

        info!(
            "stacked modifier {name}: {} leaves over parameters [{}]",
            leaf_names.len(),
            param_names.join(", ")
        );
        Ok(Self {
            name: name.to_string(),
            param_names,
            reductions,
            leaf_names,
            metadata,
            overlap: Arc::clone(&ctx.overlap),
            shape,
        })
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.metadata, StackMetadata::Retaining { .. })
    }
}

impl ModifierBase for StackedModifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn param_names(&self) -> Vec<&str> {
        self.param_names.iter().map(String::as_str).collect()
    }

    fn leaf_names(&self) -> Vec<&str> {
        self.leaf_names.iter().map(String::as_str).collect()
    }

    fn reduction(&self, param: &str) -> Option<&DMatrix<f64>> {
        self.reductions.get(param)
    }

    fn overlap(&self) -> &OverlapMethods {
        &self.overlap
    }

    fn shape(&self) -> (usize, usize) {
        self.shape
    }

    fn get_reductions_to_write(&self) -> Result<ModifierTable> {
        match &self.metadata {
            StackMetadata::Retaining { tables, .. } => {
                let mut out = ModifierTable::default();
                for table in tables {
                    out.extend(table.clone());
                }
                Ok(out)
            }
            StackMetadata::CapExceeded { cap } => Err(Error::StackCapExceeded {
                modifier: self.name.clone(),
                cap: *cap,
            }),
        }
    }
}
