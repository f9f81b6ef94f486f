use gempyor::time::format_date;
use gempyor::{ParameterTensor, TimeSpan};

pub const REDUCED_HEADERS: [&str; 4] = ["date", "subpop", "parameter", "value"];

/// Long-form rows of a reduced (day × subpop) parameter tensor.
pub fn reduced_parameter_rows(
    tensor: &ParameterTensor,
    span: &TimeSpan,
    subpops: &[String],
) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for (name, values) in tensor.names.iter().zip(&tensor.values) {
        for (day, date) in span.dates().enumerate() {
            for (col, subpop) in subpops.iter().enumerate() {
                rows.push(vec![
                    format_date(date),
                    subpop.clone(),
                    name.clone(),
                    values[(day, col)].to_string(),
                ]);
            }
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use nalgebra::DMatrix;

    #[test]
    fn test_rows_are_day_major_per_parameter() {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        let span = TimeSpan::new(start, end).unwrap();
        let tensor = ParameterTensor {
            names: vec!["beta".to_string()],
            values: vec![DMatrix::from_row_slice(2, 2, &[0.1, 0.2, 0.3, 0.4])],
        };
        let subpops = vec!["A".to_string(), "B".to_string()];
        let rows = reduced_parameter_rows(&tensor, &span, &subpops);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1], vec!["2020-01-01", "B", "beta", "0.2"]);
        assert_eq!(rows[2], vec!["2020-01-02", "A", "beta", "0.3"]);
    }
}
