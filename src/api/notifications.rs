//! Notification CRUD.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::ApiClient;
use crate::error::Result;
use crate::retry::with_retry;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub vehicle_id: Option<String>,
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub vehicle_id: Option<String>,
    pub title: String,
    pub body: String,
    pub severity: Severity,
}

impl ApiClient {
    /// `GET /api/notifications`
    pub async fn list_notifications(&self) -> Result<Vec<Notification>> {
        let url = self.api_url("/api/notifications");
        with_retry(self.retry_policy(), || {
            let url = url.clone();
            async move { self.get_json(&url, None).await }
        })
        .await
    }

    /// `POST /api/notifications`
    pub async fn create_notification(&self, new: &NewNotification) -> Result<Notification> {
        let url = self.api_url("/api/notifications");
        with_retry(self.retry_policy(), || {
            let url = url.clone();
            async move { self.send_json(reqwest::Method::POST, &url, new).await }
        })
        .await
    }

    /// `POST /api/notifications/{id}/read`
    pub async fn mark_notification_read(&self, id: Uuid) -> Result<Notification> {
        let url = self.api_url(&format!("/api/notifications/{id}/read"));
        with_retry(self.retry_policy(), || {
            let url = url.clone();
            async move {
                self.send_json(reqwest::Method::POST, &url, &serde_json::json!({}))
                    .await
            }
        })
        .await
    }

    /// `DELETE /api/notifications/{id}`
    pub async fn delete_notification(&self, id: Uuid) -> Result<()> {
        let url = self.api_url(&format!("/api/notifications/{id}"));
        with_retry(self.retry_policy(), || {
            let url = url.clone();
            async move { self.delete(&url).await }
        })
        .await
    }
}
