// Infrastructure layer (shared components)
pub mod auth;
pub mod config;
pub mod error;
pub mod retry;
pub mod telemetry;

// Domain layer
pub mod cache;
pub mod status;
pub mod stream;

// Application layer
pub mod api;
pub mod service;

// Supporting modules
pub mod tasks;

pub use error::{Result, SyncError};
pub use service::SyncService;
