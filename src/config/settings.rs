//! Scan pipeline tunables
//!
//! One instance is shared by every adapter's discovery loop. The defaults
//! are tuned for dense environments (tens of thousands of devices): writes
//! are throttled per MAC and connects are rate-limited per MAC.

use std::time::Duration;

/// Tunable constants for the discovery loop and connect scheduling.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Period of the main snapshot tick.
    pub snapshot_interval: Duration,
    /// Minimum interval between full device upserts per MAC.
    pub device_update_min_period: Duration,
    /// Minimum interval between advertisement-history rows per MAC.
    pub adv_insert_min_period: Duration,
    /// Minimum interval between classic-history rows per MAC.
    pub classic_hist_min_period: Duration,
    /// Minimum interval for quick GPS-only updates inside the device
    /// write-throttle window.
    pub gps_quick_update_min_period: Duration,
    /// Minimum interval between GATT connect attempts per MAC.
    pub connect_cooldown: Duration,
    /// RSSI floor for scheduling a connect.
    pub connect_rssi_min: i16,
    /// Bounded connect job queue per adapter.
    pub connect_queue_size: usize,
    /// RSSI filter hint sent to the stack.
    pub discover_filter_rssi: i16,
    /// DuplicateData filter hint sent to the stack.
    pub duplicate_data: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            snapshot_interval: Duration::from_secs(3),
            device_update_min_period: Duration::from_secs(10),
            adv_insert_min_period: Duration::from_secs(30),
            classic_hist_min_period: Duration::from_secs(30),
            gps_quick_update_min_period: Duration::from_secs(10),
            connect_cooldown: Duration::from_secs(30 * 60),
            connect_rssi_min: -75,
            connect_queue_size: 8192,
            discover_filter_rssi: -90,
            duplicate_data: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tuning_table() {
        let s = ScanSettings::default();
        assert_eq!(s.snapshot_interval, Duration::from_secs(3));
        assert_eq!(s.device_update_min_period, Duration::from_secs(10));
        assert_eq!(s.adv_insert_min_period, Duration::from_secs(30));
        assert_eq!(s.connect_cooldown, Duration::from_secs(1800));
        assert_eq!(s.connect_rssi_min, -75);
        assert_eq!(s.connect_queue_size, 8192);
        assert_eq!(s.discover_filter_rssi, -90);
        assert!(!s.duplicate_data);
    }
}
