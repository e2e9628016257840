//! Service history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::ApiClient;
use crate::error::Result;
use crate::retry::with_retry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: Uuid,
    pub vehicle_id: String,
    pub performed_at: DateTime<Utc>,
    pub odometer_km: f64,
    pub description: String,
    pub workshop: Option<String>,
}

impl ApiClient {
    /// `GET /api/vehicles/{id}/services`
    pub async fn list_service_records(&self, vehicle_id: &str) -> Result<Vec<ServiceRecord>> {
        let url = self.api_url(&format!("/api/vehicles/{vehicle_id}/services"));
        with_retry(self.retry_policy(), || {
            let url = url.clone();
            async move { self.get_json(&url, None).await }
        })
        .await
    }
}
