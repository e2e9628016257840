use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One vehicle's state at a point in time.
///
/// Immutable once received; a newer snapshot fully replaces the previous one
/// in the cache, there is no partial merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub vehicle_id: String,
    /// State of charge, already normalized to 0-100 by the backend
    pub battery_percent: f64,
    pub range_km: f64,
    pub speed_kmh: f64,
    pub odometer_km: f64,
    pub interior_temp_c: f64,
    pub exterior_temp_c: f64,
    pub tire_pressure_kpa: TirePressures,
    pub doors_locked: bool,
    pub charging: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TirePressures {
    pub front_left: f64,
    pub front_right: f64,
    pub rear_left: f64,
    pub rear_right: f64,
}

/// Partial status update for `PATCH /api/vehicles/{id}/status`.
///
/// Only the populated fields are sent; the backend returns the resulting full
/// snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doors_locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charging: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interior_temp_c: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_percent: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::test_support;

    #[test]
    fn test_snapshot_round_trip() {
        let snapshot = test_support::snapshot("veh-1", 76.5);
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: StatusSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_patch_skips_empty_fields() {
        let patch = StatusPatch {
            doors_locked: Some(false),
            ..Default::default()
        };
        let json = serde_json::to_string(&patch).unwrap();
        assert_eq!(json, r#"{"doors_locked":false}"#);
    }
}
