//! CSV upload decoding.
//!
//! Turns CSV text with a header row into [`RawRow`]s. Cells are typed the way
//! a dataframe reader would: empty or NA markers become null, integer and
//! float literals become numbers, `true`/`false` become booleans, and
//! everything else stays a string.

use crate::longevity::features::RawRow;
use serde_json::{Number, Value};

/// Cell texts read as null in addition to the empty string.
const NA_VALUES: [&str; 6] = ["NA", "N/A", "NaN", "nan", "null", "NULL"];

#[derive(Debug)]
pub enum CsvInputError {
    Csv(csv::Error),
    MissingHeader,
    DuplicateColumn(String),
}

impl std::fmt::Display for CsvInputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csv(e) => write!(f, "{}", e),
            Self::MissingHeader => write!(f, "missing header row"),
            Self::DuplicateColumn(name) => write!(f, "duplicate column '{}'", name),
        }
    }
}

impl std::error::Error for CsvInputError {}

impl From<csv::Error> for CsvInputError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e)
    }
}

/// Parse CSV bytes into ordered rows keyed by header.
pub fn parse_csv(bytes: &[u8]) -> Result<Vec<RawRow>, CsvInputError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes);

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return Err(CsvInputError::MissingHeader);
    }
    for (i, h) in headers.iter().enumerate() {
        if headers[..i].contains(h) {
            return Err(CsvInputError::DuplicateColumn(h.clone()));
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = RawRow::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            row.insert(header.clone(), type_cell(cell));
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Infer a JSON value from one cell's text.
pub fn type_cell(cell: &str) -> Value {
    let text = cell.trim();
    if text.is_empty() || NA_VALUES.contains(&text) {
        return Value::Null;
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(x) = text.parse::<f64>() {
        if let Some(n) = Number::from_f64(x) {
            return Value::Number(n);
        }
    }
    if text.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    Value::String(cell.to_string())
}
