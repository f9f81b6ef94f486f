use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::parameters::ParameterTable;
use crate::table::ModifierTable;

/// Run description for one simulation slot, read as JSON:
///
/// ```json
/// {
///   "input": {"seed": 42, "slot": 3, "scenario": "lockdown"},
///   "model": {"files": {"config": "config.toml", "init_snpi": "snpi.csv"}},
///   "output": {"spec": "filesystem", "dir": "model_output"}
/// }
/// ```
pub struct SlotEnvironment<I = ()> {
    input_json: serde_json::Map<String, Value>,
    pub input: Option<I>,
    pub seed: u64,
    pub slot: u64,
    pub files: HashMap<String, PathBuf>,
    output: Value,
}

impl SlotEnvironment {
    pub fn from_json(data: Value) -> Self {
        let mut input_json = data
            .get("input")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let seed = input_json
            .remove("seed")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let slot = input_json
            .remove("slot")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let files = data
            .get("model")
            .and_then(|m| m.get("files"))
            .and_then(|f| f.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), PathBuf::from(s))))
                    .collect()
            })
            .unwrap_or_default();

        let output = data.get("output").cloned().unwrap_or(Value::Null);

        Self {
            input_json,
            input: None,
            seed,
            slot,
            files,
            output,
        }
    }

    pub fn from_stdin() -> Result<Self> {
        let mut raw = String::new();
        io::stdin().read_to_string(&mut raw)?;
        if raw.trim().is_empty() {
            return Err(Error::InvalidConfig("no run description on stdin".to_string()));
        }
        let data: Value = serde_json::from_str(&raw)?;
        Ok(Self::from_json(data))
    }

    pub fn with_input_type<I: DeserializeOwned>(self) -> Result<SlotEnvironment<I>> {
        let input_value = Value::Object(self.input_json.clone());
        let input = serde_json::from_value(input_value)?;
        Ok(SlotEnvironment {
            input_json: self.input_json,
            input: Some(input),
            seed: self.seed,
            slot: self.slot,
            files: self.files,
            output: self.output,
        })
    }
}

impl<I: DeserializeOwned> SlotEnvironment<I> {
    pub fn load() -> Result<Self> {
        SlotEnvironment::from_stdin()?.with_input_type::<I>()
    }
}

impl<I> SlotEnvironment<I> {
    pub fn input_json(&self) -> &serde_json::Map<String, Value> {
        &self.input_json
    }

    pub fn file(&self, name: &str) -> Option<&Path> {
        self.files.get(name).map(PathBuf::as_path)
    }

    /// Seed of this slot's random stream; slots of one run never share one.
    pub fn slot_seed(&self) -> u64 {
        self.seed.wrapping_add(self.slot)
    }

    pub fn output_dir(&self) -> Option<PathBuf> {
        let output = &self.output;

        // flat output
        if output.get("spec").and_then(|v| v.as_str()) == Some("filesystem") {
            if let Some(dir) = output.get("dir").and_then(|v| v.as_str()) {
                return Some(PathBuf::from(dir));
            }
            return None;
        }

        // profiled output: "default", else the first profile
        if let Some(profiles) = output.get("profile").and_then(|v| v.as_object()) {
            let selected = profiles
                .get("default")
                .or_else(|| profiles.values().next());
            if let Some(profile) = selected {
                if profile.get("spec").and_then(|v| v.as_str()) == Some("filesystem") {
                    if let Some(dir) = profile.get("dir").and_then(|v| v.as_str()) {
                        return Some(PathBuf::from(dir));
                    }
                }
            }
        }

        None
    }

    /// Output file name for this slot, e.g. `000000003.snpi.csv`.
    pub fn slot_filename(&self, kind: &str) -> String {
        format!("{:09}.{kind}.csv", self.slot)
    }

    fn output_path(&self, filename: &str) -> Result<Option<PathBuf>> {
        match self.output_dir() {
            Some(dir) => {
                fs::create_dir_all(&dir)?;
                Ok(Some(dir.join(filename)))
            }
            None => Ok(None),
        }
    }

    pub fn write_csv(
        &self,
        filename: &str,
        headers: &[&str],
        rows: &[Vec<String>],
    ) -> Result<()> {
        match self.output_path(filename)? {
            Some(path) => write_rows(csv::Writer::from_path(path)?, headers, rows),
            None => write_rows(csv::Writer::from_writer(io::stdout()), headers, rows),
        }
    }

    pub fn write_modifiers(&self, filename: &str, table: &ModifierTable) -> Result<()> {
        match self.output_path(filename)? {
            Some(path) => table.write_csv(&path),
            None => table.to_writer(csv::Writer::from_writer(io::stdout())),
        }
    }

    pub fn write_parameters(&self, filename: &str, table: &ParameterTable) -> Result<()> {
        match self.output_path(filename)? {
            Some(path) => table.write_csv(&path),
            None => table.to_writer(csv::Writer::from_writer(io::stdout())),
        }
    }
}

fn write_rows<W: Write>(
    mut wtr: csv::Writer<W>,
    headers: &[&str],
    rows: &[Vec<String>],
) -> Result<()> {
    wtr.write_record(headers)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}
