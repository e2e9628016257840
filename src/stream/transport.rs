//! Transport selection and the transports themselves.
//!
//! The multiplexer is generic over [`StreamTransport`], which is also the
//! reusable reconnect seam for the other live features (remote-drive video
//! and control run their own configurations of the same primitive instead of
//! re-implementing connect/teardown).
//!
//! [`HttpTransport`] picks the mechanism per vehicle from the configured
//! endpoint shape: a push stream where the backend offers one, fixed-interval
//! snapshot polling for still-image style resources, and a one-shot
//! reachability probe for plain HTTP resources. A stream endpoint that
//! answers with a non-event-stream content type is demoted to polling at
//! runtime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::api::ApiClient;
use crate::error::{Result, SyncError};
use crate::retry::{Backoff, RetryPolicy};
use crate::status::{FrameBuffer, StreamFrame};

pub type FrameStream = BoxStream<'static, Result<StreamFrame>>;

#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Establish the live-update mechanism for one vehicle. Resolves once
    /// the transport is open; updates then arrive on the returned stream.
    /// The stream ending means the transport closed.
    async fn open(&self, vehicle_id: &str) -> Result<FrameStream>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Server-push event stream
    Sse,
    /// Fixed-interval re-fetch-and-notify
    Poll,
    /// One-time reachability probe, one immediate notify, no ongoing push
    Probe,
}

impl TransportKind {
    pub fn detect(url: &str) -> TransportKind {
        let path = Url::parse(url)
            .map(|u| u.path().to_ascii_lowercase())
            .unwrap_or_else(|_| url.to_ascii_lowercase());

        if path.ends_with("/stream") || path.ends_with("/events") {
            TransportKind::Sse
        } else if path.contains("snapshot")
            || [".jpg", ".jpeg", ".png", ".mjpg"]
                .iter()
                .any(|ext| path.ends_with(ext))
        {
            TransportKind::Poll
        } else {
            TransportKind::Probe
        }
    }
}

pub struct HttpTransport {
    api: Arc<ApiClient>,
}

impl HttpTransport {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    async fn open_sse(&self, vehicle_id: &str, url: &str) -> Result<FrameStream> {
        let response = self.api.open_stream(url).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with("text/event-stream") {
            tracing::warn!(
                vehicle_id = %vehicle_id,
                content_type = %content_type,
                "Stream endpoint did not answer with an event stream, polling instead"
            );
            return Ok(self.poll_stream(vehicle_id));
        }

        let mut bytes = Box::pin(response.bytes_stream());
        let stream = async_stream::stream! {
            let mut buffer = FrameBuffer::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        for frame in buffer.push(&chunk) {
                            yield frame;
                        }
                    }
                    Err(e) => {
                        yield Err(SyncError::Transient(e));
                        return;
                    }
                }
            }
        };
        Ok(stream.boxed())
    }

    fn poll_stream(&self, vehicle_id: &str) -> FrameStream {
        let api = self.api.clone();
        let vehicle_id = vehicle_id.to_string();
        let period = Duration::from_millis(api.settings().stream.poll_interval_ms);
        let policy = RetryPolicy::from(&api.settings().fetch);

        let stream = async_stream::stream! {
            // Additive jitter so a fleet of pollers backing off a down
            // backend does not re-arrive in lockstep.
            let mut backoff = Backoff::new(&policy).with_jitter(0.2);
            loop {
                match api.fetch_status_once(&vehicle_id).await {
                    Ok(snapshot) => {
                        backoff = Backoff::new(&policy).with_jitter(0.2);
                        yield Ok(StreamFrame::Snapshot(snapshot));
                        tokio::time::sleep(period).await;
                    }
                    Err(e) => {
                        yield Err(e);
                        tokio::time::sleep(backoff.next_delay()).await;
                    }
                }
            }
        };
        stream.boxed()
    }

    async fn open_probe(&self, vehicle_id: &str, url: &str) -> Result<FrameStream> {
        self.api.probe(url).await?;

        let api = self.api.clone();
        let vehicle_id = vehicle_id.to_string();
        let stream = async_stream::stream! {
            match api.fetch_status_once(&vehicle_id).await {
                Ok(snapshot) => yield Ok(StreamFrame::Snapshot(snapshot)),
                Err(e) => yield Err(e),
            }
            // No ongoing push; stay open so the record remains live until
            // the last subscriber leaves.
            futures::future::pending::<()>().await;
        };
        Ok(stream.boxed())
    }
}

#[async_trait]
impl StreamTransport for HttpTransport {
    async fn open(&self, vehicle_id: &str) -> Result<FrameStream> {
        let url = self.api.stream_url(vehicle_id);
        let kind = TransportKind::detect(&url);
        tracing::debug!(vehicle_id = %vehicle_id, url = %url, kind = ?kind, "Opening transport");
        match kind {
            TransportKind::Sse => self.open_sse(vehicle_id, &url).await,
            TransportKind::Poll => Ok(self.poll_stream(vehicle_id)),
            TransportKind::Probe => self.open_probe(vehicle_id, &url).await,
        }
    }
}
