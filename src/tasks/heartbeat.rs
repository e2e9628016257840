use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::api::ApiClient;
use crate::config::StreamConfig;
use crate::stream::StatusStreams;

/// Timeout for an individual keepalive ping
const KEEPALIVE_SEND_TIMEOUT_MS: u64 = 5000;

/// Background task that keeps live streams from being reclaimed.
///
/// Push streams are one-way, so liveness is maintained with an
/// application-level ping from the client on a fixed interval. A stream that
/// merely goes quiet is never torn down by the client; only the backend
/// closing it ends it.
pub struct HeartbeatTask {
    config: StreamConfig,
    streams: Arc<StatusStreams>,
    api: Arc<ApiClient>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: StreamConfig,
        streams: Arc<StatusStreams>,
        api: Arc<ApiClient>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            streams,
            api,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval_secs);
        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval_secs,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.send_keepalives().await;
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// Ping every live stream in parallel.
    async fn send_keepalives(&self) {
        let live = self.streams.live_vehicle_ids();
        if live.is_empty() {
            return;
        }

        let start = Instant::now();
        let total = live.len();

        let pings: Vec<_> = live
            .into_iter()
            .map(|vehicle_id| {
                let api = self.api.clone();
                async move {
                    let send_timeout = Duration::from_millis(KEEPALIVE_SEND_TIMEOUT_MS);
                    match timeout(send_timeout, api.keepalive(&vehicle_id)).await {
                        Ok(Ok(())) => true,
                        Ok(Err(e)) => {
                            tracing::debug!(
                                vehicle_id = %vehicle_id,
                                error = %e,
                                "Keepalive ping failed"
                            );
                            false
                        }
                        Err(_) => {
                            tracing::debug!(
                                vehicle_id = %vehicle_id,
                                timeout_ms = KEEPALIVE_SEND_TIMEOUT_MS,
                                "Keepalive ping timed out"
                            );
                            false
                        }
                    }
                }
            })
            .collect();

        let sent = join_all(pings).await.into_iter().filter(|ok| *ok).count();

        tracing::debug!(
            total = total,
            sent = sent,
            failed = total - sent,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Keepalive round completed"
        );
    }
}
