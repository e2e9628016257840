//! Connection multiplexer.
//!
//! Fans many UI subscribers onto at most one live transport per vehicle.
//! The registry owns every [`StreamRecord`]; subscribers hold only a weak
//! handle through their [`Subscription`] guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::cache::StatusCache;
use crate::config::StreamConfig;
use crate::error::SyncError;
use crate::status::{StatusSnapshot, StreamFrame};
use crate::stream::record::{ConnState, ErrorHandler, StreamRecord, UpdateHandler};
use crate::stream::transport::StreamTransport;
use crate::stream::Visibility;

pub struct StatusStreams {
    records: DashMap<String, Arc<StreamRecord>>,
    transport: Arc<dyn StreamTransport>,
    cache: Arc<StatusCache>,
    config: StreamConfig,
    visibility: watch::Sender<Visibility>,
}

impl StatusStreams {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        cache: Arc<StatusCache>,
        config: StreamConfig,
    ) -> Self {
        let (visibility, _) = watch::channel(Visibility::Visible);
        Self {
            records: DashMap::new(),
            transport,
            cache,
            config,
            visibility,
        }
    }

    /// Register for live updates on one vehicle.
    ///
    /// The first subscription for a vehicle creates its record and starts a
    /// connection attempt; later subscriptions share the existing transport.
    /// Dropping (or explicitly unsubscribing) the returned guard removes the
    /// registration, and the last one out closes the transport and deletes
    /// the record.
    pub fn subscribe(
        self: &Arc<Self>,
        vehicle_id: &str,
        on_update: impl Fn(&StatusSnapshot) + Send + Sync + 'static,
        on_error: impl Fn(&SyncError) + Send + Sync + 'static,
    ) -> Subscription {
        let record = self
            .records
            .entry(vehicle_id.to_string())
            .or_insert_with(|| {
                tracing::info!(vehicle_id = %vehicle_id, "Creating stream record");
                Arc::new(StreamRecord::new(vehicle_id))
            })
            .clone();

        let token = record.register(
            Arc::new(on_update) as UpdateHandler,
            Arc::new(on_error) as ErrorHandler,
        );
        tracing::debug!(
            vehicle_id = %vehicle_id,
            subscribers = record.subscriber_count(),
            "Subscriber registered"
        );

        self.connect(&record);

        Subscription {
            streams: Arc::downgrade(self),
            vehicle_id: vehicle_id.to_string(),
            token,
            active: AtomicBool::new(true),
        }
    }

    /// Start a connection attempt for a record. No-op while the page is
    /// hidden, an attempt is already running, or the transport is live.
    pub(crate) fn connect(self: &Arc<Self>, record: &Arc<StreamRecord>) {
        if self.visibility.borrow().is_hidden() {
            tracing::debug!(
                vehicle_id = %record.vehicle_id(),
                "Hidden; deferring connect until visible"
            );
            return;
        }
        let Some(cancel) = record.begin_connect() else {
            return;
        };

        let streams = self.clone();
        let record_for_task = record.clone();
        let task = tokio::spawn(async move {
            streams.run_connection(record_for_task, cancel).await;
        });
        record.set_task(task);
    }

    async fn run_connection(self: Arc<Self>, record: Arc<StreamRecord>, cancel: CancellationToken) {
        let vehicle_id = record.vehicle_id().to_string();
        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs);

        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            opened = tokio::time::timeout(connect_timeout, self.transport.open(&vehicle_id)) => opened,
        };

        let mut frames = match opened {
            Ok(Ok(frames)) => frames,
            Ok(Err(e)) => {
                tracing::warn!(vehicle_id = %vehicle_id, error = %e, "Transport open failed");
                record.mark_idle();
                record.fan_out_error(&e);
                return;
            }
            Err(_) => {
                let e = SyncError::ConnectTimeout(connect_timeout);
                tracing::warn!(vehicle_id = %vehicle_id, error = %e, "Transport open timed out");
                record.mark_idle();
                record.fan_out_error(&e);
                return;
            }
        };

        record.mark_live();
        self.cache.set_live(&vehicle_id, true);
        tracing::info!(vehicle_id = %vehicle_id, "Status stream live");

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    // Caller-initiated close: unsubscribe, visibility hide,
                    // or shutdown. The closer updates record state.
                    self.cache.set_live(&vehicle_id, false);
                    return;
                }
                frame = frames.next() => frame,
            };

            match frame {
                Some(Ok(StreamFrame::Snapshot(snapshot))) => {
                    self.cache.store_snapshot(&vehicle_id, snapshot.clone());
                    record.fan_out_update(&snapshot);
                }
                Some(Ok(StreamFrame::Error(message))) => {
                    record.fan_out_error(&SyncError::Backend(message));
                }
                Some(Err(e)) => {
                    // One bad frame (or one failed poll) must not kill the
                    // stream; report and keep consuming.
                    record.fan_out_error(&e);
                }
                None => {
                    tracing::warn!(vehicle_id = %vehicle_id, "Status stream closed by peer");
                    self.cache.set_live(&vehicle_id, false);
                    record.mark_idle();
                    record.fan_out_error(&SyncError::StreamClosed);
                    return;
                }
            }
        }
    }

    fn unsubscribe(&self, vehicle_id: &str, token: u64) {
        let Some(record) = self.records.get(vehicle_id).map(|r| r.clone()) else {
            return;
        };
        let remaining = record.unregister(token);
        tracing::debug!(
            vehicle_id = %vehicle_id,
            remaining = remaining,
            "Subscriber unregistered"
        );
        if remaining == 0 {
            let removed = self
                .records
                .remove_if(vehicle_id, |_, r| r.subscriber_count() == 0);
            if removed.is_some() {
                record.close();
                self.cache.set_live(vehicle_id, false);
                tracing::info!(vehicle_id = %vehicle_id, "Last subscriber left, stream closed");
            }
        }
    }

    /// Visibility transition from the host app.
    pub fn set_visibility(self: &Arc<Self>, visibility: Visibility) {
        let previous = *self.visibility.borrow();
        if previous == visibility {
            return;
        }
        self.visibility.send_replace(visibility);
        tracing::info!(visibility = ?visibility, "Visibility changed");

        match visibility {
            Visibility::Hidden => {
                for entry in self.records.iter() {
                    entry.value().suspend();
                    self.cache.set_live(entry.key(), false);
                }
            }
            Visibility::Visible => {
                let records: Vec<Arc<StreamRecord>> = self
                    .records
                    .iter()
                    .filter(|e| e.value().subscriber_count() > 0)
                    .map(|e| e.value().clone())
                    .collect();
                for record in records {
                    self.connect(&record);
                }
            }
        }
    }

    pub fn visibility(&self) -> Visibility {
        *self.visibility.borrow()
    }

    /// Vehicles whose transport is currently live; the heartbeat task pings
    /// these.
    pub fn live_vehicle_ids(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|e| e.value().state() == ConnState::Live)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, vehicle_id: &str) -> Option<Arc<StreamRecord>> {
        self.records.get(vehicle_id).map(|r| r.clone())
    }

    /// Close every stream and clear the registry. Used at service shutdown.
    pub fn close_all(&self) {
        for entry in self.records.iter() {
            entry.value().close();
            self.cache.set_live(entry.key(), false);
        }
        self.records.clear();
        tracing::info!("All status streams closed");
    }
}

/// Guard for one subscriber registration.
///
/// `unsubscribe` is idempotent and also runs on drop. When the last guard
/// for a vehicle goes, the transport is closed synchronously.
pub struct Subscription {
    streams: Weak<StatusStreams>,
    vehicle_id: String,
    token: u64,
    active: AtomicBool,
}

impl Subscription {
    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            if let Some(streams) = self.streams.upgrade() {
                streams.unsubscribe(&self.vehicle_id, self.token);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
