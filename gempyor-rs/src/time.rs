use chrono::NaiveDate;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive simulation date range. Every dense reduction matrix has one
/// column per day of this span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidConfig(format!(
                "start_date {start} is after end_date {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn n_days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Column index of `date`, if it falls inside the span.
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        self.contains(date)
            .then(|| (date - self.start).num_days() as usize)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        self.start.iter_days().take(self.n_days())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Period {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
        }
    }

    /// Column range covered by this period, clipped to `span`.
    pub fn columns(&self, span: &TimeSpan) -> Option<std::ops::RangeInclusive<usize>> {
        let start = self.start_date.max(span.start);
        let end = self.end_date.min(span.end);
        if start > end {
            return None;
        }
        Some(span.index_of(start)?..=span.index_of(end)?)
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)?)
}

pub fn join_dates<'a>(dates: impl IntoIterator<Item = &'a NaiveDate>) -> String {
    dates
        .into_iter()
        .map(|d| format_date(*d))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn split_dates(value: &str) -> Result<Vec<NaiveDate>> {
    value
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(parse_date)
        .collect()
}

/// Forward-fill a dated series (one row per entry of `dates`) to every day of
/// `span`. The first date must be on or before the span start; rows dated
/// after the span end are ignored.
pub fn resample_daily(
    dates: &[NaiveDate],
    values: &DMatrix<f64>,
    span: &TimeSpan,
) -> Result<DMatrix<f64>> {
    if dates.len() != values.nrows() {
        return Err(Error::ShapeMismatch {
            what: "dated series".to_string(),
            expected: (dates.len(), values.ncols()),
            got: (values.nrows(), values.ncols()),
        });
    }
    if dates.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::InvalidConfig(
            "dated series must be strictly increasing".to_string(),
        ));
    }
    match dates.first() {
        Some(first) if *first <= span.start => {}
        _ => {
            return Err(Error::InvalidConfig(format!(
                "dated series must start on or before {}",
                span.start
            )));
        }
    }

    let mut out = DMatrix::zeros(span.n_days(), values.ncols());
    let mut row = 0;
    for (day, date) in span.dates().enumerate() {
        while row + 1 < dates.len() && dates[row + 1] <= date {
            row += 1;
        }
        out.row_mut(day).copy_from(&values.row(row));
    }
    Ok(out)
}
