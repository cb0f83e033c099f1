//! Cargo record types

use serde::{Deserialize, Serialize};

/// Multiplier applied to penalty days to derive the storage charge.
pub const STORAGE_RATE_PER_PENALTY_DAY: f64 = 20.0;

/// A validated cargo draft ready to be inserted.
///
/// `storage` is always derived from `penalty_days`, never taken from input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCargo {
    pub cargo_no: String,
    pub cargo_type: String,
    pub cargo_size: i32,
    pub weight: Option<f64>,
    pub remarks: Option<String>,
    pub wharfage: f64,
    pub penalty_days: i32,
    pub storage: f64,
    pub electricity: f64,
    pub destuffing: f64,
    pub lifting: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cargo_serializes_camel_case() {
        let draft = NewCargo {
            cargo_no: "CN-001".to_string(),
            cargo_type: "container".to_string(),
            cargo_size: 40,
            weight: None,
            remarks: None,
            wharfage: 0.0,
            penalty_days: 3,
            storage: 60.0,
            electricity: 0.0,
            destuffing: 0.0,
            lifting: 0.0,
        };
        let json = serde_json::to_string(&draft).unwrap();
        assert!(json.contains("cargoNo"));
        assert!(json.contains("penaltyDays"));
    }
}
