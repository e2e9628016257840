use anyhow::Result;
use tokio::signal;

use vehicle_sync_client::config::Settings;
use vehicle_sync_client::telemetry;
use vehicle_sync_client::SyncService;

/// Status watch: subscribe to one vehicle's live status and log every update
/// until Ctrl+C.
#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    let vehicle_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demo-vehicle".to_string());

    let service = SyncService::from_settings(settings)?;
    tracing::info!(vehicle_id = %vehicle_id, "Watching vehicle status");

    let subscription = service.subscribe(
        &vehicle_id,
        |snapshot| {
            tracing::info!(
                vehicle_id = %snapshot.vehicle_id,
                battery_percent = snapshot.battery_percent,
                speed_kmh = snapshot.speed_kmh,
                range_km = snapshot.range_km,
                charging = snapshot.charging,
                "Status update"
            );
        },
        |error| {
            tracing::warn!(error = %error, "Stream error");
        },
    );

    signal::ctrl_c().await?;
    tracing::info!("Received Ctrl+C, shutting down");

    subscription.unsubscribe();
    service.shutdown().await;

    Ok(())
}
