//! Adapter supervisor
//!
//! One supervisor per configured adapter keeps its discovery loop running
//! across hot-plug events. The controller address is remembered at the
//! first successful probe so that an unplug/replug that renumbers the
//! controller (`hci1` → `hci2`) rebinds instead of waiting for the old id
//! to return. Restarts use exponential backoff capped at 8 seconds.

use super::blacklist::ConnectBlacklist;
use super::discovery::{self, AdapterRuntime};
use super::markers::DeviceTypePatterns;
use crate::config::ScanSettings;
use crate::core::catalog::Catalog;
use crate::core::gps::GpsState;
use crate::core::store::Store;
use crate::linef;
use crate::utils::console::Color;
use bluer::Session;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ABSENT_RECHECK: Duration = Duration::from_secs(2);
const PRESENCE_WATCH_INTERVAL: Duration = Duration::from_secs(2);
const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(8);

/// Static dependencies shared by every supervisor.
pub struct SupervisorDeps {
    pub session: Session,
    pub store: Arc<Store>,
    pub gps: Arc<GpsState>,
    pub catalog: Arc<Catalog>,
    pub patterns: Arc<DeviceTypePatterns>,
    pub blacklist: Option<Arc<ConnectBlacklist>>,
    pub session_id: i64,
    pub tag: Option<String>,
    pub settings: ScanSettings,
}

/// Split the total connect concurrency across adapters: floor division with
/// the remainder distributed one per adapter, minimum one each.
pub fn partition_connect_limits(total: usize, adapters: usize) -> Vec<usize> {
    if adapters == 0 {
        return Vec::new();
    }
    let total = total.max(1);
    let mut per = total / adapters;
    let mut rest = total % adapters;
    if per < 1 {
        per = 1;
        rest = 0;
    }
    (0..adapters)
        .map(|i| if i < rest { per + 1 } else { per })
        .collect()
}

/// Keep scanning on one adapter, with hot-plug support, until cancellation.
pub async fn run_managed_adapter_loop(
    deps: Arc<SupervisorDeps>,
    token: CancellationToken,
    adapter_id: String,
    max_connect: usize,
) {
    let mut adapter_id = adapter_id.trim().to_string();
    if adapter_id.is_empty() {
        return;
    }

    // Remember the controller address so we can rebind when the OS renames
    // the adapter after an unplug/replug.
    let mut known_addr = adapter_address(&deps.session, &adapter_id).await;

    let mut was_present = false;
    let mut backoff = BACKOFF_START;
    loop {
        if token.is_cancelled() {
            return;
        }

        let mut present = adapter_exists(&deps.session, &adapter_id).await;
        if !present {
            if let Some(addr) = &known_addr {
                if let Some(new_id) = find_adapter_by_address(&deps.session, addr).await {
                    if new_id != adapter_id {
                        linef!(
                            "[ADAPTER]",
                            Color::Yellow,
                            "{adapter_id} remapped to {new_id} (addr={addr})"
                        );
                        tracing::info!("adapter: {adapter_id} remapped to {new_id} (addr={addr})");
                        adapter_id = new_id;
                        present = adapter_exists(&deps.session, &adapter_id).await;
                    }
                }
            }
        }

        if present != was_present {
            if present {
                linef!("[ADAPTER]", Color::Green, "{adapter_id} connected");
                tracing::info!("adapter: {adapter_id} connected");
                if known_addr.is_none() {
                    known_addr = adapter_address(&deps.session, &adapter_id).await;
                }
                backoff = BACKOFF_START;
            } else {
                linef!("[ADAPTER]", Color::Yellow, "{adapter_id} disconnected");
                tracing::warn!("adapter: {adapter_id} disconnected");
            }
            was_present = present;
        }
        if !present {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(ABSENT_RECHECK) => {}
            }
            continue;
        }

        let Ok(adapter) = deps.session.adapter(&adapter_id) else {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(ABSENT_RECHECK) => {}
            }
            continue;
        };
        let _ = adapter.set_powered(true).await;

        // Child scope cancelled when the adapter disappears mid-run.
        let child = token.child_token();
        let monitor = tokio::spawn(watch_adapter_presence(
            deps.session.clone(),
            adapter_id.clone(),
            child.clone(),
        ));

        let runtime = Arc::new(AdapterRuntime {
            adapter_id: adapter_id.clone(),
            adapter,
            store: deps.store.clone(),
            gps: deps.gps.clone(),
            catalog: deps.catalog.clone(),
            patterns: deps.patterns.clone(),
            blacklist: deps.blacklist.clone(),
            session_id: deps.session_id,
            tag: deps.tag.clone(),
            max_connect,
            settings: deps.settings.clone(),
        });

        if let Err(e) = discovery::run_discovery_loop(runtime, child.clone()).await {
            tracing::warn!("discovery loop on {adapter_id} exited: {e}");
        }
        child.cancel();
        let _ = monitor.await;

        if token.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        if backoff < BACKOFF_CAP {
            backoff *= 2;
        }
    }
}

/// Cancel the child scope when the adapter vanishes during a run.
async fn watch_adapter_presence(session: Session, adapter_id: String, child: CancellationToken) {
    let mut ticker = tokio::time::interval(PRESENCE_WATCH_INTERVAL);
    loop {
        tokio::select! {
            _ = child.cancelled() => return,
            _ = ticker.tick() => {
                if !adapter_exists(&session, &adapter_id).await {
                    child.cancel();
                    return;
                }
            }
        }
    }
}

async fn adapter_exists(session: &Session, adapter_id: &str) -> bool {
    match session.adapter_names().await {
        Ok(names) => names.iter().any(|n| n == adapter_id),
        Err(_) => false,
    }
}

async fn adapter_address(session: &Session, adapter_id: &str) -> Option<String> {
    let adapter = session.adapter(adapter_id).ok()?;
    let addr = adapter.address().await.ok()?;
    Some(addr.to_string().to_uppercase())
}

/// Find an adapter id by its controller address.
async fn find_adapter_by_address(session: &Session, addr: &str) -> Option<String> {
    let addr = addr.trim().to_uppercase();
    if addr.is_empty() {
        return None;
    }
    let names = session.adapter_names().await.ok()?;
    for name in names {
        let Ok(adapter) = session.adapter(&name) else {
            continue;
        };
        let Ok(candidate) = adapter.address().await else {
            continue;
        };
        if candidate.to_string().to_uppercase() == addr {
            return Some(name);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_limits_partitioning() {
        assert_eq!(partition_connect_limits(5, 2), vec![3, 2]);
        assert_eq!(partition_connect_limits(4, 2), vec![2, 2]);
        assert_eq!(partition_connect_limits(1, 3), vec![1, 1, 1]);
        assert_eq!(partition_connect_limits(0, 2), vec![1, 1]);
        assert_eq!(partition_connect_limits(7, 3), vec![3, 2, 2]);
        assert!(partition_connect_limits(4, 0).is_empty());
    }
}
