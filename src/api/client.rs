use std::sync::Arc;

use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::auth::TokenProvider;
use crate::config::Settings;
use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;

/// HTTP client for the vehicle platform backend.
///
/// Attaches the bearer token from the injected [`TokenProvider`] to every
/// request, maps error statuses into the crate taxonomy, and honors per-call
/// cancellation. The REST wrappers in the sibling modules add retry on top;
/// the stream transports use [`ApiClient::open_stream`] directly because the
/// multiplexer owns connect timeout and reconnection.
pub struct ApiClient {
    http: reqwest::Client,
    settings: Settings,
    tokens: Arc<dyn TokenProvider>,
    policy: RetryPolicy,
}

impl ApiClient {
    pub fn new(settings: Settings, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        // No client-level timeout: it would apply to the entire response body
        // and cut long-lived event streams. Per-request timeouts are attached
        // in the JSON helpers instead.
        let http = reqwest::Client::builder().build()?;
        let policy = RetryPolicy::from(&settings.fetch);
        Ok(Self {
            http,
            settings,
            tokens,
            policy,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn status_url(&self, vehicle_id: &str) -> String {
        self.settings.status_url(vehicle_id)
    }

    pub fn stream_url(&self, vehicle_id: &str) -> String {
        self.settings.stream_url(vehicle_id)
    }

    pub(crate) fn api_url(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.settings.backend.base_url.trim_end_matches('/'),
            path
        )
    }

    async fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match self.tokens.bearer_token().await {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Run one request, racing the caller's cancellation token. Dropping the
    /// in-flight future aborts the underlying connection.
    async fn send(
        &self,
        req: RequestBuilder,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response> {
        let fut = req.send();
        let response = match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => return Err(SyncError::Cancelled),
                res = fut => res?,
            },
            None => fut.await?,
        };
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(SyncError::from_status(status, body))
        }
    }

    async fn expect_success(response: Response) -> Result<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(SyncError::from_status(status, body))
        }
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<T> {
        let req = self
            .authorized(self.http.get(url))
            .await
            .timeout(self.settings.request_timeout());
        let response = self.send(req, cancel).await?;
        Self::decode(response).await
    }

    pub(crate) async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: &B,
    ) -> Result<T> {
        let req = self
            .authorized(self.http.request(method, url))
            .await
            .timeout(self.settings.request_timeout())
            .json(body);
        let response = self.send(req, None).await?;
        Self::decode(response).await
    }

    pub(crate) async fn delete(&self, url: &str) -> Result<()> {
        let req = self
            .authorized(self.http.delete(url))
            .await
            .timeout(self.settings.request_timeout());
        let response = self.send(req, None).await?;
        Self::expect_success(response).await
    }

    /// Open the push stream for a vehicle. Returns the raw response so the
    /// transport can inspect the content type and consume the byte stream.
    pub async fn open_stream(&self, url: &str) -> Result<Response> {
        let req = self
            .authorized(self.http.get(url))
            .await
            .header(ACCEPT, "text/event-stream");
        let response = self.send(req, None).await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(SyncError::from_status(status, body))
        }
    }

    /// One-shot reachability probe (HEAD-equivalent) for non-stream endpoints.
    pub async fn probe(&self, url: &str) -> Result<()> {
        let req = self
            .authorized(self.http.head(url))
            .await
            .timeout(self.settings.request_timeout());
        let response = self.send(req, None).await?;
        Self::expect_success(response).await
    }

    /// Lightweight keepalive touch for a live stream, so intermediaries do
    /// not reclaim a quiet connection.
    pub async fn keepalive(&self, vehicle_id: &str) -> Result<()> {
        self.probe(&self.status_url(vehicle_id)).await
    }
}
