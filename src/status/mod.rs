mod frame;
mod types;

pub use frame::{decode_frame, FrameBuffer, StreamFrame};
pub use types::{StatusPatch, StatusSnapshot, TirePressures};

#[cfg(test)]
pub(crate) mod test_support {
    use super::{StatusSnapshot, TirePressures};
    use chrono::Utc;

    pub(crate) fn snapshot(vehicle_id: &str, battery_percent: f64) -> StatusSnapshot {
        StatusSnapshot {
            vehicle_id: vehicle_id.to_string(),
            battery_percent,
            range_km: 300.0,
            speed_kmh: 0.0,
            odometer_km: 1000.0,
            interior_temp_c: 20.0,
            exterior_temp_c: 10.0,
            tire_pressure_kpa: TirePressures {
                front_left: 230.0,
                front_right: 230.0,
                rear_left: 228.0,
                rear_right: 228.0,
            },
            doors_locked: true,
            charging: false,
            recorded_at: Utc::now(),
        }
    }
}
