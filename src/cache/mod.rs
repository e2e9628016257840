//! Throttled, coalescing snapshot cache.
//!
//! Sits between the UI-facing fetch entry points and the network. Serves
//! recent snapshots without touching the backend, merges concurrent fetches
//! for the same vehicle into one request, and lets streamed updates refresh
//! entries as a side effect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::error::{Result, SyncError};
use crate::status::StatusSnapshot;

/// The network seam under the cache. `ApiClient` is the production
/// implementation; tests count invocations through a double.
#[async_trait]
pub trait StatusFetcher: Send + Sync {
    async fn fetch(
        &self,
        vehicle_id: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<StatusSnapshot>;
}

#[async_trait]
impl StatusFetcher for ApiClient {
    async fn fetch(
        &self,
        vehicle_id: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<StatusSnapshot> {
        self.fetch_status(vehicle_id, cancel).await
    }
}

#[derive(Debug, Default, Clone)]
pub struct FetchOptions {
    /// Skip the cache and any in-flight coalescing; always hit the network.
    pub force: bool,
    /// Cancels this call. For the caller that starts a fetch the token aborts
    /// the network request itself; for callers that join an in-flight fetch
    /// it only abandons their own wait.
    pub cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    snapshot: StatusSnapshot,
    captured_at: Instant,
}

type SharedResult = std::result::Result<StatusSnapshot, Arc<SyncError>>;
type SharedFetch = Shared<BoxFuture<'static, SharedResult>>;

struct InFlight {
    id: u64,
    fut: SharedFetch,
}

pub struct StatusCache {
    fetcher: Arc<dyn StatusFetcher>,
    entries: Arc<DashMap<String, CacheEntry>>,
    inflight: Arc<DashMap<String, InFlight>>,
    live: Arc<DashMap<String, ()>>,
    throttle_window: Duration,
    next_fetch_id: AtomicU64,
}

impl StatusCache {
    pub fn new(fetcher: Arc<dyn StatusFetcher>, throttle_window: Duration) -> Self {
        Self {
            fetcher,
            entries: Arc::new(DashMap::new()),
            inflight: Arc::new(DashMap::new()),
            live: Arc::new(DashMap::new()),
            throttle_window,
            next_fetch_id: AtomicU64::new(0),
        }
    }

    /// Resolve the current snapshot for a vehicle.
    ///
    /// Order of preference: a cache entry kept fresh by a live stream, a
    /// cache entry younger than the throttle window, an in-flight request to
    /// join, and finally a real fetch. A failed fetch leaves any stale entry
    /// in place.
    pub async fn get_status(
        &self,
        vehicle_id: &str,
        options: FetchOptions,
    ) -> Result<StatusSnapshot> {
        if !options.force {
            if let Some(entry) = self.entries.get(vehicle_id) {
                let age = entry.captured_at.elapsed();
                if self.is_live(vehicle_id) {
                    if age >= self.throttle_window {
                        // The stream should be refreshing this entry; an
                        // over-age entry on a live vehicle means the stream
                        // has gone quiet without closing.
                        tracing::warn!(
                            vehicle_id = %vehicle_id,
                            age_ms = age.as_millis() as u64,
                            "Serving cached snapshot from quiet live stream"
                        );
                    }
                    tracing::debug!(vehicle_id = %vehicle_id, "Cache hit (live stream)");
                    return Ok(entry.snapshot.clone());
                }
                if age < self.throttle_window {
                    tracing::debug!(vehicle_id = %vehicle_id, "Cache hit (throttle window)");
                    return Ok(entry.snapshot.clone());
                }
            }
        }

        let fut = match self.inflight.entry(vehicle_id.to_string()) {
            Entry::Occupied(occupied) if !options.force => occupied.get().fut.clone(),
            entry => {
                let id = self.next_fetch_id.fetch_add(1, Ordering::SeqCst);
                let fut = self.spawn_fetch(vehicle_id.to_string(), id, options.cancel.clone());
                match entry {
                    Entry::Occupied(mut occupied) => {
                        occupied.insert(InFlight {
                            id,
                            fut: fut.clone(),
                        });
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(InFlight {
                            id,
                            fut: fut.clone(),
                        });
                    }
                }
                fut
            }
        };

        self.join(fut, options.cancel.as_ref()).await
    }

    /// Refresh the entry for a vehicle from a streamed message.
    pub fn store_snapshot(&self, vehicle_id: &str, snapshot: StatusSnapshot) {
        self.entries.insert(
            vehicle_id.to_string(),
            CacheEntry {
                snapshot,
                captured_at: Instant::now(),
            },
        );
    }

    /// Marks maintained by the multiplexer: a live stream is assumed to keep
    /// the entry fresh, so reads skip the network entirely.
    pub fn set_live(&self, vehicle_id: &str, live: bool) {
        if live {
            self.live.insert(vehicle_id.to_string(), ());
        } else {
            self.live.remove(vehicle_id);
        }
    }

    pub fn is_live(&self, vehicle_id: &str) -> bool {
        self.live.contains_key(vehicle_id)
    }

    pub fn cached(&self, vehicle_id: &str) -> Option<StatusSnapshot> {
        self.entries.get(vehicle_id).map(|e| e.snapshot.clone())
    }

    /// Start the one network call every concurrent caller will share. The
    /// fetch runs as its own task so it settles (and unregisters itself) even
    /// if every waiting caller gives up.
    fn spawn_fetch(
        &self,
        vehicle_id: String,
        id: u64,
        cancel: Option<CancellationToken>,
    ) -> SharedFetch {
        let fetcher = self.fetcher.clone();
        let entries = self.entries.clone();
        let inflight = self.inflight.clone();

        let task = tokio::spawn(async move {
            let result = fetcher.fetch(&vehicle_id, cancel).await;
            if let Ok(snapshot) = &result {
                entries.insert(
                    vehicle_id.clone(),
                    CacheEntry {
                        snapshot: snapshot.clone(),
                        captured_at: Instant::now(),
                    },
                );
            }
            // Settled either way; a forced fetch may have replaced us, so
            // only drop our own registration.
            inflight.remove_if(&vehicle_id, |_, pending| pending.id == id);
            result.map_err(Arc::new)
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(_) => Err(Arc::new(SyncError::Cancelled)),
            }
        }
        .boxed()
        .shared()
    }

    async fn join(
        &self,
        fut: SharedFetch,
        cancel: Option<&CancellationToken>,
    ) -> Result<StatusSnapshot> {
        let result = match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => return Err(SyncError::Cancelled),
                result = fut => result,
            },
            None => fut.await,
        };
        result.map_err(SyncError::Shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::test_support::snapshot;
    use futures::future::join_all;
    use std::sync::atomic::AtomicU32;
    use tokio_test::{assert_err, assert_ok};

    struct MockFetcher {
        calls: AtomicU32,
        delay: Duration,
        fail: bool,
    }

    impl MockFetcher {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                delay: Duration::from_millis(50),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusFetcher for MockFetcher {
        async fn fetch(
            &self,
            vehicle_id: &str,
            cancel: Option<CancellationToken>,
        ) -> Result<StatusSnapshot> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let sleep = tokio::time::sleep(self.delay);
            match cancel {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => return Err(SyncError::Cancelled),
                    _ = sleep => {}
                },
                None => sleep.await,
            }
            if self.fail {
                Err(SyncError::StreamClosed)
            } else {
                Ok(snapshot(vehicle_id, call as f64))
            }
        }
    }

    fn cache_with(fetcher: Arc<MockFetcher>) -> StatusCache {
        StatusCache::new(fetcher, Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_window_suppresses_refetch() {
        let fetcher = Arc::new(MockFetcher::new());
        let cache = cache_with(fetcher.clone());

        cache.get_status("veh-1", FetchOptions::default()).await.unwrap();
        cache.get_status("veh-1", FetchOptions::default()).await.unwrap();
        assert_eq!(fetcher.calls(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        cache.get_status("veh-1", FetchOptions::default()).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_coalesce_to_one_fetch() {
        let fetcher = Arc::new(MockFetcher::new());
        let cache = Arc::new(cache_with(fetcher.clone()));

        let callers: Vec<_> = (0..5)
            .map(|_| {
                let cache = cache.clone();
                async move { cache.get_status("veh-1", FetchOptions::default()).await }
            })
            .collect();
        let results = join_all(callers).await;

        assert_eq!(fetcher.calls(), 1);
        let first = results[0].as_ref().unwrap().clone();
        for result in results {
            assert_eq!(result.unwrap(), first);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalesced_callers_share_the_same_rejection() {
        let fetcher = Arc::new(MockFetcher::failing());
        let cache = Arc::new(cache_with(fetcher.clone()));

        let callers: Vec<_> = (0..3)
            .map(|_| {
                let cache = cache.clone();
                async move { cache.get_status("veh-1", FetchOptions::default()).await }
            })
            .collect();
        let results = join_all(callers).await;

        assert_eq!(fetcher.calls(), 1);
        for result in results {
            assert!(matches!(result, Err(SyncError::Shared(_))));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_bypasses_cache_and_inflight() {
        let fetcher = Arc::new(MockFetcher::new());
        let cache = cache_with(fetcher.clone());

        cache.get_status("veh-1", FetchOptions::default()).await.unwrap();
        assert_eq!(fetcher.calls(), 1);

        let forced = FetchOptions {
            force: true,
            cancel: None,
        };
        cache.get_status("veh-1", forced).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_stream_serves_cache_without_fetch() {
        let fetcher = Arc::new(MockFetcher::new());
        let cache = cache_with(fetcher.clone());

        cache.store_snapshot("veh-1", snapshot("veh-1", 50.0));
        cache.set_live("veh-1", true);

        // Well past the throttle window; the live mark alone keeps reads local.
        tokio::time::advance(Duration::from_secs(60)).await;
        let got = cache.get_status("veh-1", FetchOptions::default()).await.unwrap();
        assert_eq!(got.battery_percent, 50.0);
        assert_eq!(fetcher.calls(), 0);

        cache.set_live("veh-1", false);
        cache.get_status("veh-1", FetchOptions::default()).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_leaves_stale_entry() {
        let fetcher = Arc::new(MockFetcher::failing());
        let cache = cache_with(fetcher.clone());

        cache.store_snapshot("veh-1", snapshot("veh-1", 42.0));
        tokio::time::advance(Duration::from_secs(10)).await;

        let result = cache.get_status("veh-1", FetchOptions::default()).await;
        assert!(result.is_err());
        assert_eq!(cache.cached("veh-1").unwrap().battery_percent, 42.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_joining_caller_cancel_leaves_fetch_running() {
        let fetcher = Arc::new(MockFetcher::new());
        let cache = Arc::new(cache_with(fetcher.clone()));

        // Originator without a token; joiner with one.
        let originator = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_status("veh-1", FetchOptions::default()).await })
        };
        tokio::task::yield_now().await;

        let token = CancellationToken::new();
        let joiner = {
            let cache = cache.clone();
            let options = FetchOptions {
                force: false,
                cancel: Some(token.clone()),
            };
            tokio::spawn(async move { cache.get_status("veh-1", options).await })
        };
        tokio::task::yield_now().await;

        token.cancel();
        let joined = joiner.await.unwrap();
        assert!(matches!(joined, Err(SyncError::Cancelled)));

        let original = originator.await.unwrap();
        assert!(original.is_ok());
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inflight_entry_removed_after_settle() {
        let fetcher = Arc::new(MockFetcher::new());
        let cache = cache_with(fetcher.clone());

        tokio_test::assert_ok!(cache.get_status("veh-1", FetchOptions::default()).await);
        assert!(cache.inflight.is_empty());

        let failing = Arc::new(MockFetcher::failing());
        let cache = cache_with(failing);
        tokio_test::assert_err!(cache.get_status("veh-1", FetchOptions::default()).await);
        assert!(cache.inflight.is_empty());
    }
}
