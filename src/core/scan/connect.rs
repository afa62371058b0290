//! GATT connect worker
//!
//! Workers consume MACs from the shared bounded queue, connect with a hard
//! job deadline, wait for service resolution, dump the GATT database, and
//! persist the results. The device is always disconnected on job exit.
//! Completion is published so the discovery loop can clear its in-flight
//! flag.

use super::discovery::AdapterRuntime;
use super::{gatt, ScanError};
use crate::core::mac::normalize_mac;
use crate::core::store::SaveParams;
use crate::linef;
use crate::utils::console::Color;
use crate::utils::now_timestamp;
use bluer::Address;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Hard deadline for one connect + dump + persist job.
const JOB_DEADLINE: Duration = Duration::from_secs(60);

/// Budget for the stack to resolve remote services after connect.
const SERVICES_RESOLVED_TIMEOUT: Duration = Duration::from_secs(10);
const SERVICES_RESOLVED_POLL: Duration = Duration::from_millis(300);

/// Worker loop: runs until cancellation or queue close.
pub async fn run_connect_worker(
    ctx: Arc<AdapterRuntime>,
    token: CancellationToken,
    queue: Arc<Mutex<mpsc::Receiver<String>>>,
    done: mpsc::UnboundedSender<String>,
) {
    loop {
        let mac = tokio::select! {
            _ = token.cancelled() => return,
            mac = async { queue.lock().await.recv().await } => match mac {
                Some(mac) => mac,
                None => return,
            },
        };
        if mac.trim().is_empty() {
            continue;
        }

        let job = tokio::time::timeout(JOB_DEADLINE, connect_and_dump_gatt(&ctx, &mac));
        let outcome = tokio::select! {
            _ = token.cancelled() => return,
            outcome = job => outcome,
        };
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                // Do not spam the log for common transient stack errors.
                if !e.is_benign() {
                    tracing::warn!("bluez connect {} ({mac}) error: {e}", ctx.adapter_id);
                }
            }
            Err(_) => {
                tracing::warn!(
                    "bluez connect {} ({mac}) error: {}",
                    ctx.adapter_id,
                    ScanError::JobDeadline
                );
            }
        }
        let _ = done.send(mac);
    }
}

/// Connect to a device, wait for service resolution, dump and persist its
/// GATT database. Disconnects on exit regardless of outcome.
pub async fn connect_and_dump_gatt(ctx: &AdapterRuntime, mac: &str) -> Result<(), ScanError> {
    let mac = normalize_mac(mac);
    if mac.is_empty() {
        return Err(ScanError::EmptyMac);
    }
    let addr: Address = mac
        .parse()
        .map_err(|_| ScanError::InvalidMac(mac.clone()))?;
    let device = ctx.adapter.device(addr)?;

    device.connect().await?;
    let result = dump_connected_device(ctx, &device, &mac).await;
    let _ = device.disconnect().await;
    result
}

async fn dump_connected_device(
    ctx: &AdapterRuntime,
    device: &bluer::Device,
    mac: &str,
) -> Result<(), ScanError> {
    // Wait for the stack to enumerate the remote GATT database.
    let deadline = Instant::now() + SERVICES_RESOLVED_TIMEOUT;
    loop {
        if device.is_services_resolved().await.unwrap_or(false) {
            break;
        }
        if Instant::now() >= deadline {
            return Err(ScanError::ServicesNotResolved);
        }
        tokio::time::sleep(SERVICES_RESOLVED_POLL).await;
    }

    let (listing, device_name) =
        gatt::dump_and_store_gatt(device, mac, &ctx.store, &ctx.catalog).await?;

    let ts = now_timestamp();
    let _ = ctx.store.update_gatt_services(mac, &listing);
    let _ = ctx
        .store
        .insert_gatt_services_history(ctx.session_id, mac, &listing, &ts);

    let name = crate::utils::safe_name(&device_name);
    let _ = ctx.store.save_device(SaveParams {
        session_id: Some(ctx.session_id),
        device_family: Some("ble".to_string()),
        name: Some(name.clone()),
        mac: mac.to_string(),
        timestamp: Some(ts),
        adapter: Some(ctx.adapter_id.clone()),
        service_list: Some(listing),
        update_existing: true,
        tag: ctx.tag.clone(),
        ..Default::default()
    });

    linef!("[CONNECTED]", Color::Green, "{name} ({mac}) via {}", ctx.adapter_id);
    Ok(())
}
