//! One-shot status reads and writes.
//!
//! The throttled/coalescing path lives in the cache module; these are the
//! raw endpoint calls underneath it.

use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::error::Result;
use crate::retry::with_retry;
use crate::status::{StatusPatch, StatusSnapshot};

impl ApiClient {
    /// `GET /api/vehicles/{id}/status`
    pub async fn fetch_status(
        &self,
        vehicle_id: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<StatusSnapshot> {
        let url = self.status_url(vehicle_id);
        with_retry(self.retry_policy(), || {
            let url = url.clone();
            let cancel = cancel.clone();
            async move { self.get_json(&url, cancel.as_ref()).await }
        })
        .await
    }

    /// Single-attempt status read for the polling transport; the next poll
    /// tick is the retry.
    pub(crate) async fn fetch_status_once(&self, vehicle_id: &str) -> Result<StatusSnapshot> {
        self.get_json(&self.status_url(vehicle_id), None).await
    }

    /// `PUT /api/vehicles/{id}/status`: full replacement, returns the
    /// updated snapshot.
    pub async fn update_status(
        &self,
        vehicle_id: &str,
        snapshot: &StatusSnapshot,
    ) -> Result<StatusSnapshot> {
        let url = self.status_url(vehicle_id);
        with_retry(self.retry_policy(), || {
            let url = url.clone();
            async move {
                self.send_json(reqwest::Method::PUT, &url, snapshot).await
            }
        })
        .await
    }

    /// `PATCH /api/vehicles/{id}/status`: partial update, returns the
    /// resulting snapshot.
    pub async fn patch_status(
        &self,
        vehicle_id: &str,
        patch: &StatusPatch,
    ) -> Result<StatusSnapshot> {
        let url = self.status_url(vehicle_id);
        with_retry(self.retry_policy(), || {
            let url = url.clone();
            async move {
                self.send_json(reqwest::Method::PATCH, &url, patch).await
            }
        })
        .await
    }
}
