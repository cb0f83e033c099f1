//! Row transformer for cargo spreadsheet imports
//!
//! Pure functions: one raw spreadsheet row in, either a validated cargo
//! draft, a silent skip (all-blank row), or a rejection with field-level
//! messages. No IO happens here; duplicate knowledge is handed in by the
//! engine as a pre-resolved set of known cargo numbers.

use std::collections::{BTreeMap, HashSet};

use crate::types::{NewCargo, RowFailure, STORAGE_RATE_PER_PENALTY_DAY};

/// One raw row keyed by normalized heading. BTreeMap keeps the serialized
/// failure values in a stable order.
pub type RawRow = BTreeMap<String, String>;

/// Outcome of transforming one raw row
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutcome {
    /// Row validated, draft ready for the chunk insert
    Draft(NewCargo),
    /// Every cell blank after trimming: skipped, not counted, not an error
    Empty,
    /// Row failed a field rule
    Rejected(RowFailure),
}

/// Normalize a spreadsheet heading to a lookup key.
///
/// Lowercases and collapses every non-alphanumeric run into a single
/// underscore: `"Weight (kg)"` becomes `weight_kg`.
pub fn normalize_heading(raw: &str) -> String {
    let mut key = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.trim().chars() {
        if c.is_alphanumeric() {
            if pending_sep && !key.is_empty() {
                key.push('_');
            }
            pending_sep = false;
            key.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    key
}

/// Best-effort numeric sanitizer for loosely formatted cost/weight cells.
///
/// Strips everything that is not a digit, `.` or `-`. Blank input stays
/// absent; a cleaned string that still is not a number collapses to 0.0
/// rather than rejecting the row. Required identity/size fields get the
/// opposite treatment (rejected outright) in `transform_row`.
pub fn sanitize_numeric(raw: &str) -> Option<f64> {
    if raw.trim().is_empty() {
        return None;
    }

    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    Some(cleaned.parse::<f64>().unwrap_or(0.0))
}

fn cell<'a>(row: &'a RawRow, key: &str) -> &'a str {
    row.get(key).map(String::as_str).unwrap_or("")
}

fn is_blank_row(row: &RawRow) -> bool {
    row.values().all(|v| v.trim().is_empty())
}

fn parse_int(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Some(n);
    }
    // Excel often hands integers back as floats ("40.0")
    match trimmed.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 => Some(f as i64),
        _ => None,
    }
}

fn reject(row_number: i64, row: &RawRow, attribute: &str, message: &str) -> TransformOutcome {
    TransformOutcome::Rejected(RowFailure {
        row: row_number,
        attribute: attribute.to_string(),
        errors: vec![message.to_string()],
        values: serde_json::to_value(row).unwrap_or(serde_json::Value::Null),
    })
}

/// Transform one raw row into a cargo draft.
///
/// `known_cargo_nos` carries the numbers already persisted plus those seen
/// earlier in this file, so duplicates surface as row failures instead of
/// aborting the import at the unique index.
pub fn transform_row(
    row_number: i64,
    row: &RawRow,
    known_cargo_nos: &HashSet<String>,
) -> TransformOutcome {
    if is_blank_row(row) {
        return TransformOutcome::Empty;
    }

    let cargo_no = cell(row, "cargo_no").trim().to_string();
    if cargo_no.is_empty() {
        return reject(row_number, row, "cargo_no", "Cargo number is required");
    }
    if known_cargo_nos.contains(&cargo_no) {
        return reject(row_number, row, "cargo_no", "Cargo number already exists");
    }

    let cargo_type = cell(row, "cargo_type").trim().to_string();
    if cargo_type.is_empty() {
        return reject(row_number, row, "cargo_type", "Cargo type is required");
    }

    let cargo_size_raw = cell(row, "cargo_size").trim();
    if cargo_size_raw.is_empty() {
        return reject(row_number, row, "cargo_size", "Cargo size is required");
    }
    let cargo_size = match parse_int(cargo_size_raw) {
        Some(n) => n,
        None => return reject(row_number, row, "cargo_size", "Cargo size must be an integer"),
    };
    if cargo_size < 1 {
        return reject(row_number, row, "cargo_size", "Cargo size must be at least 1");
    }
    let cargo_size = match i32::try_from(cargo_size) {
        Ok(n) => n,
        Err(_) => return reject(row_number, row, "cargo_size", "Cargo size is out of range"),
    };

    // Cost fields tolerate sloppy formatting: absent stays null for weight,
    // becomes 0 for the charge columns.
    let weight = sanitize_numeric(cell(row, "weight_kg"));
    let wharfage = sanitize_numeric(cell(row, "wharfage_usd")).unwrap_or(0.0);
    let electricity = sanitize_numeric(cell(row, "electricity_usd")).unwrap_or(0.0);
    let destuffing = sanitize_numeric(cell(row, "destuffing_usd")).unwrap_or(0.0);
    let lifting = sanitize_numeric(cell(row, "lifting_usd")).unwrap_or(0.0);

    let penalty_days = match parse_int(cell(row, "penalty_days")) {
        Some(n) if n < 0 => {
            return reject(row_number, row, "penalty_days", "Penalty days cannot be negative")
        }
        Some(n) => match i32::try_from(n) {
            Ok(n) => n,
            Err(_) => {
                return reject(row_number, row, "penalty_days", "Penalty days is out of range")
            }
        },
        // Blank or unparseable falls back to zero, like the cost columns
        None => 0,
    };

    let remarks = cell(row, "remarks").trim();
    let remarks = if remarks.is_empty() {
        None
    } else {
        Some(remarks.to_string())
    };

    TransformOutcome::Draft(NewCargo {
        cargo_no,
        cargo_type,
        cargo_size,
        weight,
        remarks,
        wharfage,
        penalty_days,
        // Always derived, never read from the file
        storage: f64::from(penalty_days) * STORAGE_RATE_PER_PENALTY_DAY,
        electricity,
        destuffing,
        lifting,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn valid_row() -> RawRow {
        row(&[
            ("cargo_no", "CN-1001"),
            ("cargo_type", "container"),
            ("cargo_size", "40"),
            ("weight_kg", "12,500.5 kg"),
            ("wharfage_usd", "$150.00"),
            ("penalty_days", "3"),
            ("remarks", "fragile"),
        ])
    }

    #[test]
    fn test_heading_normalization() {
        assert_eq!(normalize_heading("Weight (kg)"), "weight_kg");
        assert_eq!(normalize_heading("Cargo No"), "cargo_no");
        assert_eq!(normalize_heading("Wharfage  (USD)"), "wharfage_usd");
        assert_eq!(normalize_heading("  Penalty-Days "), "penalty_days");
        assert_eq!(normalize_heading("Destuffing(USD)"), "destuffing_usd");
    }

    #[test]
    fn test_sanitize_currency_string() {
        assert_eq!(sanitize_numeric("$1,234.56"), Some(1234.56));
    }

    #[test]
    fn test_sanitize_non_numeric_collapses_to_zero() {
        assert_eq!(sanitize_numeric("abc"), Some(0.0));
        assert_eq!(sanitize_numeric("-.-"), Some(0.0));
    }

    #[test]
    fn test_sanitize_blank_is_absent() {
        assert_eq!(sanitize_numeric(""), None);
        assert_eq!(sanitize_numeric("   "), None);
    }

    #[test]
    fn test_blank_row_is_skipped_silently() {
        let blank = row(&[("cargo_no", "  "), ("cargo_type", ""), ("weight_kg", "")]);
        assert_eq!(
            transform_row(2, &blank, &HashSet::new()),
            TransformOutcome::Empty
        );
    }

    #[test]
    fn test_valid_row_produces_draft() {
        let outcome = transform_row(2, &valid_row(), &HashSet::new());
        let TransformOutcome::Draft(draft) = outcome else {
            panic!("expected draft, got {outcome:?}");
        };
        assert_eq!(draft.cargo_no, "CN-1001");
        assert_eq!(draft.cargo_type, "container");
        assert_eq!(draft.cargo_size, 40);
        assert_eq!(draft.weight, Some(12500.5));
        assert_eq!(draft.wharfage, 150.0);
        assert_eq!(draft.penalty_days, 3);
        assert_eq!(draft.remarks.as_deref(), Some("fragile"));
    }

    #[test]
    fn test_storage_always_derived_from_penalty_days() {
        let mut r = valid_row();
        // A storage column in the file must be ignored
        r.insert("storage".to_string(), "9999".to_string());
        let TransformOutcome::Draft(draft) = transform_row(2, &r, &HashSet::new()) else {
            panic!("expected draft");
        };
        assert_eq!(draft.storage, 60.0);

        r.insert("penalty_days".to_string(), "0".to_string());
        let TransformOutcome::Draft(draft) = transform_row(2, &r, &HashSet::new()) else {
            panic!("expected draft");
        };
        assert_eq!(draft.storage, 0.0);
    }

    #[test]
    fn test_missing_cargo_no_rejected() {
        let mut r = valid_row();
        r.insert("cargo_no".to_string(), "   ".to_string());
        let TransformOutcome::Rejected(failure) = transform_row(3, &r, &HashSet::new()) else {
            panic!("expected rejection");
        };
        assert_eq!(failure.row, 3);
        assert_eq!(failure.attribute, "cargo_no");
        assert_eq!(failure.errors, vec!["Cargo number is required".to_string()]);
    }

    #[test]
    fn test_duplicate_cargo_no_rejected() {
        let known: HashSet<String> = ["CN-1001".to_string()].into();
        let TransformOutcome::Rejected(failure) = transform_row(2, &valid_row(), &known) else {
            panic!("expected rejection");
        };
        assert_eq!(failure.attribute, "cargo_no");
        assert_eq!(failure.errors, vec!["Cargo number already exists".to_string()]);
    }

    #[test]
    fn test_missing_cargo_type_rejected() {
        let mut r = valid_row();
        r.remove("cargo_type");
        let TransformOutcome::Rejected(failure) = transform_row(2, &r, &HashSet::new()) else {
            panic!("expected rejection");
        };
        assert_eq!(failure.attribute, "cargo_type");
    }

    #[test]
    fn test_cargo_size_rules() {
        let mut r = valid_row();
        r.insert("cargo_size".to_string(), "".to_string());
        assert!(matches!(
            transform_row(2, &r, &HashSet::new()),
            TransformOutcome::Rejected(f) if f.errors[0] == "Cargo size is required"
        ));

        r.insert("cargo_size".to_string(), "big".to_string());
        assert!(matches!(
            transform_row(2, &r, &HashSet::new()),
            TransformOutcome::Rejected(f) if f.errors[0] == "Cargo size must be an integer"
        ));

        r.insert("cargo_size".to_string(), "0".to_string());
        assert!(matches!(
            transform_row(2, &r, &HashSet::new()),
            TransformOutcome::Rejected(f) if f.errors[0] == "Cargo size must be at least 1"
        ));

        // Excel-style float form of an integer is accepted
        r.insert("cargo_size".to_string(), "20.0".to_string());
        assert!(matches!(
            transform_row(2, &r, &HashSet::new()),
            TransformOutcome::Draft(d) if d.cargo_size == 20
        ));
    }

    #[test]
    fn test_cargo_size_beyond_i32_rejected() {
        let mut r = valid_row();
        r.insert("cargo_size".to_string(), "5000000000".to_string());
        assert!(matches!(
            transform_row(2, &r, &HashSet::new()),
            TransformOutcome::Rejected(f) if f.attribute == "cargo_size"
                && f.errors[0] == "Cargo size is out of range"
        ));
    }

    #[test]
    fn test_negative_penalty_days_rejected() {
        let mut r = valid_row();
        r.insert("penalty_days".to_string(), "-2".to_string());
        assert!(matches!(
            transform_row(2, &r, &HashSet::new()),
            TransformOutcome::Rejected(f) if f.attribute == "penalty_days"
                && f.errors[0] == "Penalty days cannot be negative"
        ));
    }

    #[test]
    fn test_penalty_days_beyond_i32_rejected() {
        let mut r = valid_row();
        r.insert("penalty_days".to_string(), "5000000000".to_string());
        assert!(matches!(
            transform_row(2, &r, &HashSet::new()),
            TransformOutcome::Rejected(f) if f.errors[0] == "Penalty days is out of range"
        ));
    }

    #[test]
    fn test_blank_cost_fields_default_to_zero_and_weight_to_null() {
        let r = row(&[
            ("cargo_no", "CN-2"),
            ("cargo_type", "bulk"),
            ("cargo_size", "1"),
        ]);
        let TransformOutcome::Draft(draft) = transform_row(2, &r, &HashSet::new()) else {
            panic!("expected draft");
        };
        assert_eq!(draft.weight, None);
        assert_eq!(draft.wharfage, 0.0);
        assert_eq!(draft.electricity, 0.0);
        assert_eq!(draft.destuffing, 0.0);
        assert_eq!(draft.lifting, 0.0);
        assert_eq!(draft.penalty_days, 0);
        assert_eq!(draft.storage, 0.0);
    }

    #[test]
    fn test_transform_is_idempotent() {
        let known = HashSet::new();
        let first = transform_row(2, &valid_row(), &known);
        let second = transform_row(2, &valid_row(), &known);
        assert_eq!(first, second);
    }

    #[test]
    fn test_rejection_carries_raw_values() {
        let mut r = valid_row();
        r.insert("cargo_no".to_string(), "".to_string());
        let TransformOutcome::Rejected(failure) = transform_row(5, &r, &HashSet::new()) else {
            panic!("expected rejection");
        };
        assert_eq!(failure.values["cargo_type"], "container");
        assert_eq!(failure.values["wharfage_usd"], "$150.00");
    }
}
