mod client;
mod commands;
mod notifications;
mod services;
mod status;

pub use client::ApiClient;
pub use commands::{CommandReceipt, CommandStatus, VehicleCommand};
pub use notifications::{NewNotification, Notification, Severity};
pub use services::ServiceRecord;
