//! Command issuance.
//!
//! Commands are fire-and-acknowledge: the backend queues them for the vehicle
//! and answers with a receipt. Execution semantics are entirely server-side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::ApiClient;
use crate::error::Result;
use crate::retry::with_retry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VehicleCommand {
    LockDoors,
    UnlockDoors,
    StartClimate { target_temp_c: f64 },
    StopClimate,
    StartCharging,
    StopCharging,
    FlashLights,
    HonkHorn,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Queued,
    Sent,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReceipt {
    pub command_id: Uuid,
    pub vehicle_id: String,
    pub status: CommandStatus,
    pub accepted_at: DateTime<Utc>,
}

impl ApiClient {
    /// `POST /api/vehicles/{id}/commands`
    pub async fn send_command(
        &self,
        vehicle_id: &str,
        command: &VehicleCommand,
    ) -> Result<CommandReceipt> {
        let url = self.api_url(&format!("/api/vehicles/{vehicle_id}/commands"));
        with_retry(self.retry_policy(), || {
            let url = url.clone();
            async move {
                self.send_json(reqwest::Method::POST, &url, command).await
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let json = serde_json::to_string(&VehicleCommand::StartClimate { target_temp_c: 21.5 })
            .unwrap();
        assert_eq!(json, r#"{"type":"start_climate","target_temp_c":21.5}"#);

        let json = serde_json::to_string(&VehicleCommand::LockDoors).unwrap();
        assert_eq!(json, r#"{"type":"lock_doors"}"#);
    }
}
