//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Argument parsing (every flag is optional; interactive prompts fill
//!   the rest)
//! - Exit codes for automation

pub mod exit_codes;

pub use exit_codes::ExitCodes;

use clap::Parser;
use std::path::PathBuf;

/// bluescout command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "bluescout",
    version,
    about = "Continuous multi-adapter Bluetooth survey daemon (BlueZ)",
    long_about = None
)]
pub struct Cli {
    /// Use GPS? 'y' to enable, 'n' to skip the prompt
    #[arg(long = "use-gps", value_name = "y|n")]
    pub use_gps: Option<String>,

    /// GPS source: auto|gpsd|serial|off
    #[arg(long = "gps-mode", default_value = "auto")]
    pub gps_mode: String,

    /// gpsd TCP address
    #[arg(long = "gpsd-addr", default_value = "127.0.0.1:2947")]
    pub gpsd_addr: String,

    /// GPS serial device path (e.g., /dev/ttyUSB0)
    #[arg(long = "gps-device")]
    pub gps_device: Option<String>,

    /// GPS serial baud rate
    #[arg(long = "gps-baud", default_value_t = 9600)]
    pub gps_baud: u32,

    /// Data directory root (expects default/ and custom/ subfolders)
    #[arg(long = "data-dir", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Optional custom data directory (overrides <data-dir>/custom)
    #[arg(long = "custom-data-dir")]
    pub custom_data_dir: Option<PathBuf>,

    /// Comma-separated list of Bluetooth adapters to use (e.g., hci0,hci1).
    /// If empty, interactive selection is used.
    #[arg(long = "adapters")]
    pub adapters: Option<String>,

    /// Index of the Bluetooth adapter to use
    #[arg(long = "adapter-index")]
    pub adapter_index: Option<usize>,

    /// Preflight: restart the bluetooth service if adapters are missing
    /// (requires root + systemctl)
    #[arg(
        long = "restart-bluetooth",
        default_value_t = true,
        action = clap::ArgAction::Set,
        value_name = "BOOL"
    )]
    pub restart_bluetooth: bool,

    /// Preflight: BlueZ device cache cleanup mode: auto|off|force
    #[arg(long = "bluez-cache", default_value = "auto")]
    pub bluez_cache: String,

    /// Console status interval in seconds
    #[arg(long = "stats-interval", default_value_t = 5)]
    pub stats_interval: u64,
}

/// Split a comma-separated value into trimmed, non-empty parts.
pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Deduplicate while preserving order.
pub fn unique_strings(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_splitting() {
        assert_eq!(split_csv("hci0,hci1"), vec!["hci0", "hci1"]);
        assert_eq!(split_csv(" hci0 , , hci1 "), vec!["hci0", "hci1"]);
        assert!(split_csv("").is_empty());
    }

    #[test]
    fn dedup_preserves_order() {
        let items = vec!["hci1".to_string(), "hci0".to_string(), "hci1".to_string()];
        assert_eq!(unique_strings(items), vec!["hci1", "hci0"]);
    }

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["bluescout"]);
        assert_eq!(cli.gps_mode, "auto");
        assert_eq!(cli.gpsd_addr, "127.0.0.1:2947");
        assert_eq!(cli.gps_baud, 9600);
        assert_eq!(cli.stats_interval, 5);
        assert!(cli.restart_bluetooth);
        assert_eq!(cli.bluez_cache, "auto");
    }
}
