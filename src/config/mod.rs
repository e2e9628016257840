mod settings;

pub use settings::{AuthConfig, BackendConfig, FetchConfig, Settings, StreamConfig};
