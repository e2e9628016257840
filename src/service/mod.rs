//! The long-lived service instance that owns every registry.
//!
//! The connection registry, snapshot cache, and in-flight table live here as
//! constructed objects with an explicit lifecycle (build at login or page
//! load, [`SyncService::shutdown`] at logout), injected into consumers
//! rather than reached through module-level singletons.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::api::ApiClient;
use crate::auth::{self, TokenProvider};
use crate::cache::{FetchOptions, StatusCache};
use crate::config::Settings;
use crate::error::{Result, SyncError};
use crate::status::{StatusPatch, StatusSnapshot};
use crate::stream::{HttpTransport, StatusStreams, StreamTransport, Subscription, Visibility};
use crate::tasks::HeartbeatTask;

pub struct SyncService {
    settings: Settings,
    api: Arc<ApiClient>,
    cache: Arc<StatusCache>,
    streams: Arc<StatusStreams>,
    shutdown_tx: broadcast::Sender<()>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl SyncService {
    /// Wire the full stack from settings and a token provider.
    pub fn new(settings: Settings, tokens: Arc<dyn TokenProvider>) -> Result<Arc<Self>> {
        let api = Arc::new(ApiClient::new(settings.clone(), tokens)?);
        let transport: Arc<dyn StreamTransport> = Arc::new(HttpTransport::new(api.clone()));
        Self::with_transport(settings, api, transport)
    }

    /// As [`SyncService::new`], with the transport injected. Embedders can
    /// supply their own transport (or a double) here.
    pub fn with_transport(
        settings: Settings,
        api: Arc<ApiClient>,
        transport: Arc<dyn StreamTransport>,
    ) -> Result<Arc<Self>> {
        let cache = Arc::new(StatusCache::new(
            api.clone(),
            Duration::from_secs(settings.fetch.throttle_window_secs),
        ));
        let streams = Arc::new(StatusStreams::new(
            transport,
            cache.clone(),
            settings.stream.clone(),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        let service = Arc::new(Self {
            settings,
            api,
            cache,
            streams,
            shutdown_tx,
            heartbeat: Mutex::new(None),
        });
        service.spawn_heartbeat();
        Ok(service)
    }

    /// Build with the token provider derived from the auth settings section.
    pub fn from_settings(settings: Settings) -> Result<Arc<Self>> {
        let tokens = auth::provider_from_settings(&settings.auth);
        Self::new(settings, tokens)
    }

    fn spawn_heartbeat(&self) {
        let task = HeartbeatTask::new(
            self.settings.stream.clone(),
            self.streams.clone(),
            self.api.clone(),
            self.shutdown_tx.subscribe(),
        );
        let handle = tokio::spawn(async move {
            task.run().await;
        });
        *self.heartbeat.lock().unwrap() = Some(handle);
    }

    /// Live updates for one vehicle; see [`StatusStreams::subscribe`].
    pub fn subscribe(
        &self,
        vehicle_id: &str,
        on_update: impl Fn(&StatusSnapshot) + Send + Sync + 'static,
        on_error: impl Fn(&SyncError) + Send + Sync + 'static,
    ) -> Subscription {
        self.streams.subscribe(vehicle_id, on_update, on_error)
    }

    /// One-shot read through the throttled, coalescing cache.
    pub async fn get_status(
        &self,
        vehicle_id: &str,
        options: FetchOptions,
    ) -> Result<StatusSnapshot> {
        self.cache.get_status(vehicle_id, options).await
    }

    /// Full status replacement; the cache picks up the returned snapshot.
    pub async fn update_status(
        &self,
        vehicle_id: &str,
        snapshot: &StatusSnapshot,
    ) -> Result<StatusSnapshot> {
        let updated = self.api.update_status(vehicle_id, snapshot).await?;
        self.cache.store_snapshot(vehicle_id, updated.clone());
        Ok(updated)
    }

    /// Partial status update; the cache picks up the returned snapshot.
    pub async fn patch_status(
        &self,
        vehicle_id: &str,
        patch: &StatusPatch,
    ) -> Result<StatusSnapshot> {
        let updated = self.api.patch_status(vehicle_id, patch).await?;
        self.cache.store_snapshot(vehicle_id, updated.clone());
        Ok(updated)
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        self.streams.set_visibility(visibility);
    }

    /// Command, notification, and service-record wrappers live on the API
    /// client; they carry no coordination state.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn streams(&self) -> &Arc<StatusStreams> {
        &self.streams
    }

    pub fn cache(&self) -> &Arc<StatusCache> {
        &self.cache
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Stop the heartbeat, close every live transport, and clear the
    /// registry. Safe to call more than once.
    pub async fn shutdown(&self) {
        tracing::info!("Sync service shutting down");
        let _ = self.shutdown_tx.send(());
        self.streams.close_all();
        let handle = self.heartbeat.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        tracing::info!("Sync service shutdown complete");
    }
}
