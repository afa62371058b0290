//! Periodic status ticker
//!
//! Prints `[GPS DATA]`, `[DB STATS]` and `[BATTERY]` console lines on a
//! fixed interval so long surveys stay observable from a terminal.

use crate::core::gps::GpsState;
use crate::core::store::Store;
use crate::linef;
use crate::utils::console::Color;
use crate::utils::system;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Run the ticker until cancellation.
pub async fn run(
    token: CancellationToken,
    interval: Duration,
    gps: Arc<GpsState>,
    store: Arc<Store>,
) {
    let interval = if interval.is_zero() {
        Duration::from_secs(5)
    } else {
        interval
    };
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so startup output stays
    // readable.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        print_once(&gps, &store).await;
    }
}

async fn print_once(gps: &GpsState, store: &Store) {
    let gps_line = gps.string_for_record().unwrap_or_else(|| "offline".to_string());
    linef!("[GPS DATA]", Color::Cyan, "{gps_line}");

    if let Ok(stats) = store.get_statistics() {
        linef!(
            "[DB STATS]",
            Color::Gray,
            "Total Devices: {}, Named: {}, With Services: {}, Typed {}",
            stats.total_devices,
            stats.named_devices,
            stats.devices_with_service,
            stats.typed_devices
        );
    }

    let battery = tokio::task::spawn_blocking(system::battery_percent)
        .await
        .unwrap_or_default();
    if !battery.is_empty() {
        linef!("[BATTERY]", Color::Gray, "{battery}");
    }
}
