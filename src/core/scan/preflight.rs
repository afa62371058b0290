//! Startup preflight
//!
//! Verifies that the configured adapters are visible to the stack, tries a
//! bluetooth service restart when they are not (root + systemctl only), and
//! optionally clears the stack's cached device objects so a survey starts
//! from a clean tree. Everything here is best-effort; preflight never
//! blocks scanning.

use crate::linef;
use crate::utils::console::Color;
use crate::utils::system;
use bluer::Session;
use std::time::Duration;

/// Device-cache cleanup mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    Off,
    /// Remove only unpaired, untrusted device objects.
    #[default]
    Auto,
    /// Remove every disconnected device object.
    Force,
}

impl std::str::FromStr for CacheMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "force" => Ok(Self::Force),
            _ => Ok(Self::Auto),
        }
    }
}

/// Preflight options.
#[derive(Debug, Clone, Copy)]
pub struct PreflightOptions {
    pub restart_bluetooth_service: bool,
    pub cache_mode: CacheMode,
}

/// Run the preflight checks for the selected adapters.
pub async fn preflight(session: &Session, adapters: &[String], opts: PreflightOptions) {
    if adapters.is_empty() {
        return;
    }

    let missing = missing_adapters(session, adapters).await;
    if !missing.is_empty() {
        linef!(
            "[PREFLIGHT]",
            Color::Yellow,
            "missing adapters: {}",
            missing.join(",")
        );
        if opts.restart_bluetooth_service && system::is_root() {
            if !system::service_is_active("bluetooth").await {
                linef!("[PREFLIGHT]", Color::Gray, "bluetooth service inactive -> restarting");
                let _ = system::restart_service("bluetooth").await;
            }
            tokio::time::sleep(Duration::from_millis(1500)).await;
            let still_missing = missing_adapters(session, &missing).await;
            if !still_missing.is_empty() {
                linef!(
                    "[PREFLIGHT]",
                    Color::Yellow,
                    "still missing adapters: {}",
                    still_missing.join(",")
                );
            }
        }
    }

    if opts.cache_mode == CacheMode::Off {
        return;
    }
    for adapter_id in adapters {
        let removed = clear_device_cache(session, adapter_id, opts.cache_mode).await;
        if removed > 0 {
            linef!(
                "[PREFLIGHT]",
                Color::Gray,
                "adapter={adapter_id} cache cleared: {removed} device objects"
            );
        }
    }
}

async fn missing_adapters(session: &Session, adapters: &[String]) -> Vec<String> {
    let known = session.adapter_names().await.unwrap_or_default();
    adapters
        .iter()
        .filter(|a| !a.trim().is_empty())
        .filter(|a| !known.iter().any(|k| k == a.trim()))
        .map(|a| a.trim().to_string())
        .collect()
}

/// Remove cached device objects under an adapter. Connected devices are
/// never removed; `Auto` additionally keeps paired or trusted ones.
async fn clear_device_cache(session: &Session, adapter_id: &str, mode: CacheMode) -> usize {
    let Ok(adapter) = session.adapter(adapter_id.trim()) else {
        return 0;
    };
    let Ok(addresses) = adapter.device_addresses().await else {
        return 0;
    };

    let mut removed = 0;
    for addr in addresses {
        let Ok(device) = adapter.device(addr) else {
            continue;
        };
        if device.is_connected().await.unwrap_or(false) {
            continue;
        }
        if mode == CacheMode::Auto {
            let paired = device.is_paired().await.unwrap_or(false);
            let trusted = device.is_trusted().await.unwrap_or(false);
            if paired || trusted {
                continue;
            }
        }
        if adapter.remove_device(addr).await.is_ok() {
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_mode_parsing() {
        assert_eq!("off".parse::<CacheMode>().unwrap(), CacheMode::Off);
        assert_eq!("force".parse::<CacheMode>().unwrap(), CacheMode::Force);
        assert_eq!("auto".parse::<CacheMode>().unwrap(), CacheMode::Auto);
        assert_eq!("".parse::<CacheMode>().unwrap(), CacheMode::Auto);
        assert_eq!("bogus".parse::<CacheMode>().unwrap(), CacheMode::Auto);
    }
}
