use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the vehicle platform backend
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Path template for the per-vehicle status stream; `{id}` is replaced
    /// with the vehicle identifier. The transport selector inspects the
    /// resulting URL shape to pick SSE, polling, or a one-shot probe.
    #[serde(default = "default_stream_path")]
    pub stream_path: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// Static bearer token. When absent, requests go out unauthenticated and
    /// the backend is expected to answer 401.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Bound on how long a connection attempt may wait for the transport to
    /// open (seconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Client keepalive ping interval for live streams (seconds)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Snapshot polling interval when the endpoint is not a push stream
    /// (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Minimum age before a cached snapshot may be re-fetched (seconds)
    #[serde(default = "default_throttle_window")]
    pub throttle_window_secs: u64,
    /// Retry attempts for one logical fetch
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry (milliseconds)
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_stream_path() -> String {
    "/api/vehicles/{id}/status/stream".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    500
}

fn default_throttle_window() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    1.5
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("backend.base_url", default_base_url())?
            .set_default("backend.request_timeout_secs", default_request_timeout() as i64)?
            .set_default("backend.stream_path", default_stream_path())?
            .set_default("stream.connect_timeout_secs", default_connect_timeout() as i64)?
            .set_default(
                "stream.heartbeat_interval_secs",
                default_heartbeat_interval() as i64,
            )?
            .set_default("stream.poll_interval_ms", default_poll_interval() as i64)?
            .set_default("fetch.throttle_window_secs", default_throttle_window() as i64)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // BACKEND_BASE_URL, AUTH_TOKEN, STREAM_POLL_INTERVAL_MS, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    /// URL of the one-shot status resource for a vehicle.
    pub fn status_url(&self, vehicle_id: &str) -> String {
        format!(
            "{}/api/vehicles/{}/status",
            self.backend.base_url.trim_end_matches('/'),
            vehicle_id
        )
    }

    /// URL of the configured live-update resource for a vehicle.
    pub fn stream_url(&self, vehicle_id: &str) -> String {
        let path = self.backend.stream_path.replace("{id}", vehicle_id);
        format!("{}{}", self.backend.base_url.trim_end_matches('/'), path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            stream_path: default_stream_path(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            throttle_window_secs: default_throttle_window(),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let stream = StreamConfig::default();
        assert_eq!(stream.connect_timeout_secs, 5);
        assert_eq!(stream.heartbeat_interval_secs, 30);

        let fetch = FetchConfig::default();
        assert_eq!(fetch.throttle_window_secs, 5);
        assert_eq!(fetch.max_attempts, 3);
    }

    #[test]
    fn test_url_construction() {
        let settings = Settings {
            backend: BackendConfig {
                base_url: "http://backend:9000/".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            settings.status_url("veh-1"),
            "http://backend:9000/api/vehicles/veh-1/status"
        );
        assert_eq!(
            settings.stream_url("veh-1"),
            "http://backend:9000/api/vehicles/veh-1/status/stream"
        );
    }
}
