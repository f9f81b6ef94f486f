//! Long-form modifier metadata: one row per draw unit (an ungrouped subpop or
//! a whole group), written once per slot and read back to reproduce draws.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::time::{Period, split_dates};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierRecord {
    /// Subpop, or group members joined by `,`.
    #[serde(alias = "geoid")]
    pub subpop: String,
    #[serde(alias = "npi_name")]
    pub modifier_name: String,
    /// Period starts joined by `,`, in declaration order.
    pub start_date: String,
    pub end_date: String,
    pub parameter: String,
    #[serde(alias = "value")]
    pub reduction: f64,
}

impl ModifierRecord {
    pub fn periods(&self) -> Result<Vec<Period>> {
        let invalid = |reason: String| Error::InvalidRecord {
            modifier: self.modifier_name.clone(),
            subpop: self.subpop.clone(),
            reason,
        };
        let starts = split_dates(&self.start_date).map_err(|e| invalid(e.to_string()))?;
        let ends = split_dates(&self.end_date).map_err(|e| invalid(e.to_string()))?;
        if starts.len() != ends.len() || starts.is_empty() {
            return Err(invalid(format!(
                "{} start dates but {} end dates",
                starts.len(),
                ends.len()
            )));
        }
        Ok(starts
            .into_iter()
            .zip(ends)
            .map(|(s, e): (NaiveDate, NaiveDate)| Period::new(s, e))
            .collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModifierTable {
    pub records: Vec<ModifierRecord>,
}

impl ModifierTable {
    pub const HEADERS: [&'static str; 6] = [
        "subpop",
        "modifier_name",
        "start_date",
        "end_date",
        "parameter",
        "reduction",
    ];

    pub fn new(records: Vec<ModifierRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn extend(&mut self, other: ModifierTable) {
        self.records.extend(other.records);
    }

    /// Rows sorted by modifier name then subpop key.
    pub fn sorted(mut self) -> Self {
        self.records.sort_by(|a, b| {
            a.modifier_name
                .cmp(&b.modifier_name)
                .then_with(|| a.subpop.cmp(&b.subpop))
                .then_with(|| a.parameter.cmp(&b.parameter))
        });
        self
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let reader = csv::Reader::from_path(path)?;
        Self::from_reader(reader)
    }

    pub fn from_reader<R: io::Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let records = reader
            .deserialize()
            .collect::<std::result::Result<Vec<ModifierRecord>, _>>()?;
        Ok(Self { records })
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        self.to_writer(csv::Writer::from_path(path)?)
    }

    pub fn to_writer<W: io::Write>(&self, mut writer: csv::Writer<W>) -> Result<()> {
        if self.records.is_empty() {
            writer.write_record(Self::HEADERS)?;
        }
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// A previously written table indexed by (modifier name, group key).
#[derive(Debug, Clone, Default)]
pub struct LoadedModifiers {
    index: HashMap<(String, String), ModifierRecord>,
}

impl LoadedModifiers {
    pub fn new(table: ModifierTable) -> Self {
        let index = table
            .records
            .into_iter()
            .map(|r| ((r.modifier_name.clone(), r.subpop.clone()), r))
            .collect();
        Self { index }
    }

    pub fn get(&self, modifier: &str, key: &str) -> Option<&ModifierRecord> {
        self.index.get(&(modifier.to_string(), key.to_string()))
    }

    pub fn contains_modifier(&self, modifier: &str) -> bool {
        self.index.keys().any(|(m, _)| m == modifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(subpop: &str, starts: &str, ends: &str) -> ModifierRecord {
        ModifierRecord {
            subpop: subpop.to_string(),
            modifier_name: "lockdown".to_string(),
            start_date: starts.to_string(),
            end_date: ends.to_string(),
            parameter: "beta".to_string(),
            reduction: 0.4,
        }
    }

    #[test]
    fn test_csv_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snpi.csv");
        let table = ModifierTable::new(vec![
            record("A,B", "2020-01-02,2020-01-07", "2020-01-03,2020-01-08"),
            record("C", "2020-01-01", "2020-01-10"),
        ]);
        table.write_csv(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("subpop,modifier_name,start_date,end_date,parameter,reduction"));
        assert!(raw.contains("\"A,B\""));
        assert_eq!(ModifierTable::read_csv(&path).unwrap(), table);
    }

    #[test]
    fn test_reads_legacy_columns() {
        let raw = "geoid,npi_name,start_date,end_date,parameter,value\n\
                   A,lockdown,2020-01-01,2020-01-05,r0,0.3\n";
        let table = ModifierTable::from_reader(csv::Reader::from_reader(raw.as_bytes())).unwrap();
        assert_eq!(table.records[0].subpop, "A");
        assert_eq!(table.records[0].modifier_name, "lockdown");
        assert_eq!(table.records[0].reduction, 0.3);
    }

    #[test]
    fn test_periods_must_pair_up() {
        let good = record("A", "2020-01-02,2020-01-07", "2020-01-03,2020-01-08");
        assert_eq!(good.periods().unwrap().len(), 2);
        let bad = record("A", "2020-01-02,2020-01-07", "2020-01-03");
        assert!(matches!(bad.periods(), Err(Error::InvalidRecord { .. })));
    }

    #[test]
    fn test_loaded_lookup_by_group_key() {
        let table = ModifierTable::new(vec![record("A,B", "2020-01-01", "2020-01-02")]);
        let loaded = LoadedModifiers::new(table);
        assert!(loaded.get("lockdown", "A,B").is_some());
        assert!(loaded.get("lockdown", "A").is_none());
        assert!(loaded.contains_modifier("lockdown"));
    }
}
