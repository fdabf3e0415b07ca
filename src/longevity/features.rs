//! RA Feature Encoder
//!
//! Derives the five canonical RA columns from ordered tabular input:
//!
//! | Column | Meaning                | Derived from                          |
//! |--------|------------------------|---------------------------------------|
//! | `RA`   | Relative Activity      | min-max of the first numeric column   |
//! | `D`    | Delta                  | first difference of `RA`              |
//! | `M`    | Momentum               | trailing mean of `D` (window 3)       |
//! | `S`    | Stability              | trailing sample std of `RA` (window 3)|
//! | `LR`   | Learning-Rate average  | EWM mean of `RA` (span 3)             |
//!
//! A column the caller already supplied is kept verbatim and never recomputed.
//! The transform is pure and order-sensitive: row order is preserved exactly.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One raw input row: column name to JSON value, in insertion order.
pub type RawRow = Map<String, Value>;

/// Denominator guard for min-max normalization.
pub const RA_EPSILON: f64 = 1e-10;

/// Trailing window used by Momentum and Stability.
pub const ROLLING_WINDOW: usize = 3;

/// EWM span used by the Learning-Rate average (alpha = 2 / (span + 1)).
pub const EWM_SPAN: f64 = 3.0;

// =============================================================================
// FEATURES
// =============================================================================

/// The canonical engineered features, in modeling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    #[serde(rename = "RA")]
    Ra,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "M")]
    M,
    #[serde(rename = "S")]
    S,
    #[serde(rename = "LR")]
    Lr,
}

impl Feature {
    /// All features in canonical order.
    pub const ALL: [Feature; 5] = [Feature::Ra, Feature::D, Feature::M, Feature::S, Feature::Lr];

    /// Column name used in input and in persisted rows.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Ra => "RA",
            Self::D => "D",
            Self::M => "M",
            Self::S => "S",
            Self::Lr => "LR",
        }
    }

    pub fn from_column(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.column() == name)
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

// =============================================================================
// FEATURE ROW
// =============================================================================

/// One encoded row: the caller's passthrough columns plus the RA features.
///
/// Passthrough columns serialize first (in input order), followed by any
/// feature that has a value for this row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    #[serde(flatten)]
    pub columns: RawRow,
    #[serde(rename = "RA", default, skip_serializing_if = "Option::is_none")]
    pub ra: Option<f64>,
    #[serde(rename = "D", default, skip_serializing_if = "Option::is_none")]
    pub d: Option<f64>,
    #[serde(rename = "M", default, skip_serializing_if = "Option::is_none")]
    pub m: Option<f64>,
    #[serde(rename = "S", default, skip_serializing_if = "Option::is_none")]
    pub s: Option<f64>,
    #[serde(rename = "LR", default, skip_serializing_if = "Option::is_none")]
    pub lr: Option<f64>,
}

impl FeatureRow {
    pub fn get(&self, feature: Feature) -> Option<f64> {
        match feature {
            Feature::Ra => self.ra,
            Feature::D => self.d,
            Feature::M => self.m,
            Feature::S => self.s,
            Feature::Lr => self.lr,
        }
    }

    fn slot(&mut self, feature: Feature) -> &mut Option<f64> {
        match feature {
            Feature::Ra => &mut self.ra,
            Feature::D => &mut self.d,
            Feature::M => &mut self.m,
            Feature::S => &mut self.s,
            Feature::Lr => &mut self.lr,
        }
    }

    /// Numeric value of a passthrough column, if present and numeric.
    pub fn number(&self, column: &str) -> Option<f64> {
        self.columns.get(column).and_then(Value::as_f64)
    }
}

// =============================================================================
// ENCODED TABLE
// =============================================================================

/// Output of the encoder: rows plus the set of features that exist as columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedTable {
    pub rows: Vec<FeatureRow>,
    /// Features present as columns (supplied or derived), canonical order.
    pub features: Vec<Feature>,
    /// Input column order (union of keys, first-seen order).
    pub input_columns: Vec<String>,
}

impl EncodedTable {
    pub fn has(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// Values of one feature column, row-aligned.
    pub fn column(&self, feature: Feature) -> Vec<Option<f64>> {
        self.rows.iter().map(|r| r.get(feature)).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Errors from feature encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeError {
    /// A caller-supplied feature column holds a non-numeric value.
    NonNumericFeature { column: String, row: usize },
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonNumericFeature { column, row } => {
                write!(f, "Supplied feature column '{}' is not numeric at row {}", column, row)
            }
        }
    }
}

impl std::error::Error for EncodeError {}

// =============================================================================
// ENCODER
// =============================================================================

/// Union of column names across rows, in first-seen order.
pub fn column_order(rows: &[RawRow]) -> Vec<String> {
    let mut seen = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !seen.iter().any(|k: &String| k == key) {
                seen.push(key.clone());
            }
        }
    }
    seen
}

/// A column is numeric when every non-null value is a JSON number and at
/// least one value is present. Booleans do not count.
pub fn is_numeric_column(rows: &[RawRow], column: &str) -> bool {
    let mut any = false;
    for row in rows {
        match row.get(column) {
            None | Some(Value::Null) => {}
            Some(Value::Number(_)) => any = true,
            Some(_) => return false,
        }
    }
    any
}

/// Encode raw rows, deriving every RA feature the caller did not supply.
pub fn encode(raw_rows: Vec<RawRow>) -> Result<EncodedTable, EncodeError> {
    let input_columns = column_order(&raw_rows);
    let source_column = input_columns
        .iter()
        .find(|c| is_numeric_column(&raw_rows, c))
        .cloned();

    let supplied: Vec<Feature> = input_columns
        .iter()
        .filter_map(|c| Feature::from_column(c))
        .collect();

    let source_values: Vec<Option<f64>> = match &source_column {
        Some(col) => raw_rows
            .iter()
            .map(|r| r.get(col).and_then(Value::as_f64))
            .collect(),
        None => Vec::new(),
    };

    // Move supplied feature columns out of the passthrough map into typed slots.
    let mut rows = Vec::with_capacity(raw_rows.len());
    for (idx, mut columns) in raw_rows.into_iter().enumerate() {
        let mut row = FeatureRow::default();
        for &feature in &supplied {
            match columns.shift_remove(feature.column()) {
                None | Some(Value::Null) => {}
                Some(Value::Number(n)) => *row.slot(feature) = n.as_f64(),
                Some(_) => {
                    return Err(EncodeError::NonNumericFeature {
                        column: feature.column().to_string(),
                        row: idx,
                    })
                }
            }
        }
        row.columns = columns;
        rows.push(row);
    }

    let mut features = supplied.clone();
    let mut derive = |feature: Feature, values: Vec<Option<f64>>, rows: &mut Vec<FeatureRow>| {
        for (row, value) in rows.iter_mut().zip(values) {
            *row.slot(feature) = value;
        }
        features.push(feature);
    };

    if !supplied.contains(&Feature::Ra) && source_column.is_some() {
        derive(Feature::Ra, relative_activity(&source_values), &mut rows);
    }

    let ra: Vec<Option<f64>> = rows.iter().map(|r| r.ra).collect();
    let has_ra = supplied.contains(&Feature::Ra) || source_column.is_some();

    if !supplied.contains(&Feature::D) && has_ra {
        derive(Feature::D, delta(&ra), &mut rows);
    }

    let has_d = has_ra || supplied.contains(&Feature::D);
    if !supplied.contains(&Feature::M) && has_d {
        let d: Vec<Option<f64>> = rows.iter().map(|r| r.d).collect();
        derive(Feature::M, rolling_mean(&d, ROLLING_WINDOW), &mut rows);
    }

    if !supplied.contains(&Feature::S) && has_ra {
        derive(Feature::S, rolling_std(&ra, ROLLING_WINDOW), &mut rows);
    }

    if !supplied.contains(&Feature::Lr) && has_ra {
        derive(Feature::Lr, ewm_mean(&ra, EWM_SPAN), &mut rows);
    }

    features.sort_by_key(|f| Feature::ALL.iter().position(|x| x == f));

    Ok(EncodedTable {
        rows,
        features,
        input_columns,
    })
}

/// `(x - min) / (max - min + eps)` over the present values.
///
/// When `max - min` overflows, every term is first divided by the largest
/// magnitude so the range stays finite and the result stays in `[0, 1]`.
pub fn relative_activity(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let present = values.iter().flatten();
    let min = present.clone().copied().fold(f64::INFINITY, f64::min);
    let max = present.copied().fold(f64::NEG_INFINITY, f64::max);
    let scale = if (max - min).is_finite() {
        1.0
    } else {
        max.abs().max(min.abs())
    };
    let (lo, range) = (min / scale, max / scale - min / scale);
    values
        .iter()
        .map(|v| v.map(|x| (x / scale - lo) / (range + RA_EPSILON / scale)))
        .collect()
}

/// First difference; the first row and any gap produce 0.
pub fn delta(values: &[Option<f64>]) -> Vec<Option<f64>> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let prev = if i == 0 { None } else { values[i - 1] };
            match (v, prev) {
                (Some(cur), Some(prev)) => Some(cur - prev),
                _ => Some(0.0),
            }
        })
        .collect()
}

fn trailing(values: &[Option<f64>], i: usize, window: usize) -> Vec<f64> {
    let start = (i + 1).saturating_sub(window);
    values[start..=i].iter().flatten().copied().collect()
}

/// Trailing mean over up to `window` rows, skipping gaps (min one sample).
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            let w = trailing(values, i, window);
            if w.is_empty() {
                None
            } else {
                Some(w.iter().sum::<f64>() / w.len() as f64)
            }
        })
        .collect()
}

/// Trailing sample standard deviation; 0 where fewer than two samples exist.
pub fn rolling_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            let w = trailing(values, i, window);
            if w.len() < 2 {
                return Some(0.0);
            }
            let n = w.len() as f64;
            let mean = w.iter().sum::<f64>() / n;
            let var = w.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
            Some(var.sqrt())
        })
        .collect()
}

/// Adjusted exponentially-weighted mean.
///
/// Weights decay by position, so a gap still ages older samples but adds no
/// weight of its own.
pub fn ewm_mean(values: &[Option<f64>], span: f64) -> Vec<Option<f64>> {
    let decay = 1.0 - 2.0 / (span + 1.0);
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    values
        .iter()
        .map(|v| {
            numerator *= decay;
            denominator *= decay;
            if let Some(x) = v {
                numerator += x;
                denominator += 1.0;
            }
            (denominator > 0.0).then(|| numerator / denominator)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: Vec<Value>) -> Vec<RawRow> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn sample() -> Vec<RawRow> {
        rows(vec![
            json!({"value": 10, "metric": 20}),
            json!({"value": 15, "metric": 25}),
            json!({"value": 20, "metric": 30}),
            json!({"value": 25, "metric": 35}),
            json!({"value": 30, "metric": 40}),
        ])
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn derives_all_features_from_first_numeric_column() {
        let table = encode(sample()).unwrap();
        assert_eq!(table.features, Feature::ALL.to_vec());
        assert_eq!(table.len(), 5);

        let ra: Vec<f64> = table.column(Feature::Ra).into_iter().flatten().collect();
        let expected = [0.0, 0.25, 0.5, 0.75, 1.0];
        for (a, b) in ra.iter().zip(expected) {
            assert!((a - b).abs() < 1e-8, "{a} vs {b}");
        }
        // Passthrough columns are untouched.
        assert_eq!(table.rows[0].number("metric"), Some(20.0));
    }

    #[test]
    fn ra_is_bounded_and_first_delta_is_zero() {
        let input = rows(vec![
            json!({"x": -3.5}),
            json!({"x": 100.0}),
            json!({"x": 7}),
            json!({"x": 7}),
        ]);
        let table = encode(input).unwrap();
        for row in &table.rows {
            let ra = row.ra.unwrap();
            assert!((0.0..=1.0).contains(&ra));
        }
        assert_eq!(table.rows[0].d, Some(0.0));
    }

    #[test]
    fn ra_survives_range_overflow() {
        let input = rows(vec![
            json!({"x": -1e308}),
            json!({"x": 0.0}),
            json!({"x": 1e308}),
        ]);
        let table = encode(input).unwrap();
        let ra: Vec<f64> = table.column(Feature::Ra).into_iter().flatten().collect();
        assert!(close(ra[0], 0.0));
        assert!(close(ra[1], 0.5));
        assert!(close(ra[2], 1.0));
        for row in &table.rows {
            for feature in Feature::ALL {
                assert!(row.get(feature).unwrap().is_finite());
            }
        }
    }

    #[test]
    fn windows_tolerate_short_sequences() {
        let table = encode(rows(vec![json!({"x": 1.0})])).unwrap();
        let row = &table.rows[0];
        assert_eq!(row.d, Some(0.0));
        assert_eq!(row.m, Some(0.0));
        assert_eq!(row.s, Some(0.0));
        assert!(close(row.lr.unwrap(), row.ra.unwrap()));

        let table = encode(rows(vec![json!({"x": 1.0}), json!({"x": 3.0})])).unwrap();
        assert!(table.rows[1].s.unwrap() > 0.0);
    }

    #[test]
    fn momentum_and_stability_follow_trailing_window() {
        let d = vec![Some(0.0), Some(0.3), Some(0.6), Some(0.9)];
        let m = rolling_mean(&d, 3);
        assert!(close(m[1].unwrap(), 0.15));
        assert!(close(m[2].unwrap(), 0.3));
        assert!(close(m[3].unwrap(), 0.6));

        let s = rolling_std(&[Some(1.0), Some(2.0), Some(3.0), Some(5.0)], 3);
        assert_eq!(s[0], Some(0.0));
        assert!(close(s[1].unwrap(), 0.5f64.sqrt()));
        assert!(close(s[2].unwrap(), 1.0));
        assert!(close(s[3].unwrap(), (7.0f64 / 3.0).sqrt()));
    }

    #[test]
    fn ewm_matches_adjusted_formula() {
        let lr = ewm_mean(&[Some(1.0), Some(2.0), Some(3.0)], EWM_SPAN);
        assert!(close(lr[0].unwrap(), 1.0));
        // (2 + 0.5*1) / 1.5
        assert!(close(lr[1].unwrap(), 2.5 / 1.5));
        // (3 + 0.5*2 + 0.25*1) / 1.75
        assert!(close(lr[2].unwrap(), 4.25 / 1.75));

        // A gap carries the previous average forward.
        let lr = ewm_mean(&[Some(1.0), None, Some(3.0)], EWM_SPAN);
        assert!(close(lr[1].unwrap(), 1.0));
        assert!(close(lr[2].unwrap(), (3.0 + 0.25) / 1.25));
    }

    #[test]
    fn no_numeric_column_omits_every_feature() {
        let table = encode(rows(vec![
            json!({"name": "a", "flag": true}),
            json!({"name": "b", "flag": false}),
        ]))
        .unwrap();
        assert!(table.features.is_empty());
        assert!(table.rows.iter().all(|r| r.ra.is_none() && r.lr.is_none()));
    }

    #[test]
    fn supplied_feature_columns_are_kept() {
        let table = encode(rows(vec![
            json!({"value": 1, "RA": 0.9}),
            json!({"value": 2, "RA": 0.1}),
        ]))
        .unwrap();
        assert_eq!(table.rows[0].ra, Some(0.9));
        assert_eq!(table.rows[1].ra, Some(0.1));
        assert!(!table.rows[0].columns.contains_key("RA"));
        assert!(close(table.rows[1].d.unwrap(), -0.8));
    }

    #[test]
    fn supplied_delta_column_feeds_ra_and_momentum() {
        let table = encode(rows(vec![
            json!({"D": 0.5, "label": "x"}),
            json!({"D": 1.5, "label": "y"}),
        ]))
        .unwrap();
        // D itself is the first numeric column, so RA derives from it.
        assert!(table.has(Feature::Ra));
        assert_eq!(table.rows[1].d, Some(1.5));
        assert!(close(table.rows[1].m.unwrap(), 1.0));
    }

    #[test]
    fn non_numeric_supplied_feature_is_rejected() {
        let err = encode(rows(vec![json!({"value": 1, "S": "high"})])).unwrap_err();
        assert_eq!(
            err,
            EncodeError::NonNumericFeature {
                column: "S".to_string(),
                row: 0
            }
        );
    }

    #[test]
    fn missing_values_propagate_as_gaps() {
        let table = encode(rows(vec![
            json!({"x": 0.0}),
            json!({"x": null}),
            json!({"x": 10.0}),
        ]))
        .unwrap();
        assert_eq!(table.rows[1].ra, None);
        assert_eq!(table.rows[1].d, Some(0.0));
        assert_eq!(table.rows[2].d, Some(0.0));
        assert!(table.rows[2].ra.unwrap() > 0.99);
    }

    #[test]
    fn column_order_is_first_seen_union() {
        let input = rows(vec![json!({"b": 1, "a": 2}), json!({"c": 3, "a": 4})]);
        assert_eq!(column_order(&input), vec!["b", "a", "c"]);
    }

    #[test]
    fn feature_row_serializes_passthrough_then_features() {
        let table = encode(sample()).unwrap();
        let json = serde_json::to_string(&table.rows[0]).unwrap();
        let value_pos = json.find("\"value\"").unwrap();
        let ra_pos = json.find("\"RA\"").unwrap();
        assert!(value_pos < ra_pos);

        let back: FeatureRow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table.rows[0]);
    }
}
