//! Per-MAC bookkeeping for one discovery loop
//!
//! The discovery loop is the sole mutator of this state, so none of it
//! needs locking. Tracks sighting counts, write-throttle timestamps,
//! connect in-flight flags and cooldowns, and evicts entries for devices
//! not seen in a long time so dense environments do not grow the maps
//! without bound.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Evict per-MAC state when the device was last seen this long ago.
pub const EVICT_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Mutable per-MAC scan state.
#[derive(Debug, Clone)]
pub struct MacState {
    /// Seen before; drives `[NEW]` vs `[UPDATE]` console lines.
    pub known: bool,
    /// Sightings across snapshots; connects require at least two.
    pub seen_count: u32,
    pub last_device_write: Option<Instant>,
    pub last_adv_write: Option<Instant>,
    pub last_classic_hist: Option<Instant>,
    pub last_gps_write: Option<Instant>,
    pub last_gps_val: Option<String>,
    pub last_marked: Option<String>,
    /// A connect job is queued or running for this MAC.
    pub in_flight: bool,
    pub last_conn_attempt: Option<Instant>,
    pub last_seen: Instant,
}

impl MacState {
    fn new() -> Self {
        Self {
            known: false,
            seen_count: 0,
            last_device_write: None,
            last_adv_write: None,
            last_classic_hist: None,
            last_gps_write: None,
            last_gps_val: None,
            last_marked: None,
            in_flight: false,
            last_conn_attempt: None,
            last_seen: Instant::now(),
        }
    }
}

/// All per-MAC state for one adapter's discovery loop.
#[derive(Debug, Default)]
pub struct MacTracker {
    states: HashMap<String, MacState>,
}

impl MacTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting: bumps `seen_count`, refreshes `last_seen`, and
    /// returns the state for this tick's processing.
    pub fn observe(&mut self, mac: &str) -> &mut MacState {
        let state = self
            .states
            .entry(mac.to_string())
            .or_insert_with(MacState::new);
        state.seen_count = state.seen_count.saturating_add(1);
        state.last_seen = Instant::now();
        state
    }

    pub fn get_mut(&mut self, mac: &str) -> Option<&mut MacState> {
        self.states.get_mut(mac)
    }

    /// Clear the in-flight flag after a connect job completed.
    pub fn clear_in_flight(&mut self, mac: &str) {
        if let Some(state) = self.states.get_mut(mac) {
            state.in_flight = false;
        }
    }

    /// Drop state for MACs not seen within [`EVICT_AFTER`]. Returns the
    /// number of evicted entries.
    pub fn evict_stale(&mut self) -> usize {
        let before = self.states.len();
        self.states
            .retain(|_, s| s.last_seen.elapsed() < EVICT_AFTER || s.in_flight);
        before - self.states.len()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Connect gating: every condition must hold before a GATT connect job may
/// be scheduled for a device.
pub fn should_schedule_connect(
    state: &MacState,
    rssi: Option<i16>,
    rssi_min: i16,
    has_gatt_services: bool,
    cooldown: Duration,
) -> bool {
    let Some(rssi) = rssi else {
        return false;
    };
    if rssi < rssi_min {
        return false;
    }
    if state.seen_count < 2 {
        return false;
    }
    if has_gatt_services {
        return false;
    }
    if state.in_flight {
        return false;
    }
    if let Some(last) = state.last_conn_attempt {
        if last.elapsed() < cooldown {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(30 * 60);

    #[test]
    fn observe_counts_sightings() {
        let mut tracker = MacTracker::new();
        tracker.observe("AA:BB:CC:DD:EE:01");
        let state = tracker.observe("AA:BB:CC:DD:EE:01");
        assert_eq!(state.seen_count, 2);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn connect_gating_sequence() {
        let mut tracker = MacTracker::new();
        let mac = "AA:BB:CC:DD:EE:02";

        // First sighting at -80: too weak, and only one sighting.
        let state = tracker.observe(mac);
        assert!(!should_schedule_connect(state, Some(-80), -75, false, COOLDOWN));

        // Second sighting, still -80: RSSI below floor.
        let state = tracker.observe(mac);
        assert!(!should_schedule_connect(state, Some(-80), -75, false, COOLDOWN));

        // Third sighting at -60: eligible.
        let state = tracker.observe(mac);
        assert!(should_schedule_connect(state, Some(-60), -75, false, COOLDOWN));
        state.in_flight = true;
        state.last_conn_attempt = Some(Instant::now());

        // Fourth sighting while in flight: blocked.
        let state = tracker.observe(mac);
        assert!(!should_schedule_connect(state, Some(-60), -75, false, COOLDOWN));

        // Job done, but the cooldown still applies.
        tracker.clear_in_flight(mac);
        let state = tracker.observe(mac);
        assert!(!should_schedule_connect(state, Some(-60), -75, false, COOLDOWN));

        // After the cooldown a retry is allowed.
        let state = tracker.get_mut(mac).unwrap();
        state.last_conn_attempt = Some(Instant::now() - COOLDOWN);
        assert!(should_schedule_connect(state, Some(-60), -75, false, COOLDOWN));
    }

    #[test]
    fn missing_rssi_never_connects() {
        let mut tracker = MacTracker::new();
        let mac = "AA:BB:CC:DD:EE:03";
        tracker.observe(mac);
        let state = tracker.observe(mac);
        assert!(!should_schedule_connect(state, None, -75, false, COOLDOWN));
    }

    #[test]
    fn stored_gatt_services_block_connects() {
        let mut tracker = MacTracker::new();
        let mac = "AA:BB:CC:DD:EE:04";
        tracker.observe(mac);
        let state = tracker.observe(mac);
        assert!(!should_schedule_connect(state, Some(-50), -75, true, COOLDOWN));
    }

    #[test]
    fn eviction_drops_stale_entries_but_keeps_in_flight() {
        let mut tracker = MacTracker::new();
        tracker.observe("AA:BB:CC:DD:EE:05");
        tracker.observe("AA:BB:CC:DD:EE:06");

        {
            let state = tracker.get_mut("AA:BB:CC:DD:EE:05").unwrap();
            state.last_seen = Instant::now() - EVICT_AFTER - Duration::from_secs(1);
        }
        assert_eq!(tracker.evict_stale(), 1);
        assert_eq!(tracker.len(), 1);

        {
            let state = tracker.get_mut("AA:BB:CC:DD:EE:06").unwrap();
            state.last_seen = Instant::now() - EVICT_AFTER - Duration::from_secs(1);
            state.in_flight = true;
        }
        assert_eq!(tracker.evict_stale(), 0);
        assert_eq!(tracker.len(), 1);
    }
}
