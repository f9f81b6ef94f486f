use std::collections::BTreeSet;

use chrono::NaiveDate;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Broad failure classes. Configuration and capacity errors are fatal for the
/// slot that raised them; nothing in this crate retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    CapacityExceeded,
    Data,
    Io,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(
        "grouped and ungrouped subpops {resolved:?} differ from the affected subpops {affected:?} for modifier {modifier}"
    )]
    IncompletePartition {
        modifier: String,
        resolved: BTreeSet<String>,
        affected: BTreeSet<String>,
    },

    #[error("subpop_groups error for modifier {modifier}: {members:?} contains duplicates")]
    DuplicateGroupMembership { modifier: String, members: Vec<String> },

    #[error("some subpops belong to several groups in modifier {modifier}: {subpops:?}")]
    OverlappingGroups { modifier: String, subpops: Vec<String> },

    #[error("modifier {modifier} names subpop {subpop} which is not part of the model")]
    UnknownSubpop { modifier: String, subpop: String },

    #[error("unknown modifier method {method} (known: {known})")]
    UnknownMethod { method: String, known: String },

    #[error("couldn't find scenario in config file [got: {name}]")]
    MissingModifier { name: String },

    #[error("modifier {name} is included more than once in stacked modifier {stack}")]
    DuplicateModifier { stack: String, name: String },

    #[error("modifier {modifier} is missing required field {field}")]
    MissingField { modifier: String, field: &'static str },

    #[error("invalid value for {field} in modifier {modifier}: {reason}")]
    InvalidField {
        modifier: String,
        field: &'static str,
        reason: String,
    },

    #[error("modifier {modifier} has a period ending before it starts: {start} > {end}")]
    InvertedPeriod {
        modifier: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error(
        "modifier {modifier} has period {start}..{end} outside of the simulation range {span_start}..{span_end}"
    )]
    PeriodOutOfRange {
        modifier: String,
        start: NaiveDate,
        end: NaiveDate,
        span_start: NaiveDate,
        span_end: NaiveDate,
    },

    #[error("invalid distribution: {0}")]
    InvalidDistribution(String),

    #[error("scenario {scenario} is not listed in {section}.scenarios")]
    UnknownScenario { section: &'static str, scenario: String },

    #[error("section {0} is absent from the configuration")]
    MissingSection(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "stacked modifier {modifier} retained more than {cap} metadata rows; raise FLEPI_MAX_STACK_SIZE to write its reductions"
    )]
    StackCapExceeded { modifier: String, cap: usize },

    #[error("invalid metadata record for {modifier} / {subpop}: {reason}")]
    InvalidRecord {
        modifier: String,
        subpop: String,
        reason: String,
    },

    #[error("shape mismatch for {what}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        what: String,
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("invalid timeseries {path}: {reason}")]
    InvalidTimeseries { path: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Date(#[from] chrono::ParseError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::StackCapExceeded { .. } => ErrorKind::CapacityExceeded,
            Error::InvalidRecord { .. }
            | Error::ShapeMismatch { .. }
            | Error::InvalidTimeseries { .. }
            | Error::Csv(_)
            | Error::Date(_) => ErrorKind::Data,
            Error::Io(_) => ErrorKind::Io,
            _ => ErrorKind::Configuration,
        }
    }
}
