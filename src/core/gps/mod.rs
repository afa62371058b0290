//! GPS fix state and reader supervision
//!
//! A single [`GpsState`] serves position fixes to the rest of the daemon:
//! - readers (gpsd TCP or NMEA serial) feed packets and fixes in
//! - a watchdog force-closes a stalled reader so the outer loop reconnects
//! - a status loop flips the operator-visible online/offline state
//!
//! Every observation the scanner persists takes a snapshot through
//! [`GpsState::fix_snapshot`] or [`GpsState::string_for_record`].

pub mod gpsd;
pub mod nmea;
pub mod ports;
pub mod serial;

use crate::linef;
use crate::utils::console::Color;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// How long a fix stays "fresh" before records mark it as cached.
pub const DEFAULT_FRESHNESS_TIMEOUT: Duration = Duration::from_secs(300);

/// Watchdog: force a reconnect when no packet arrived for this long.
const NO_PACKET_TIMEOUT: Duration = Duration::from_secs(12);
/// Watchdog: minimum spacing between forced reconnects.
const MIN_RECONNECT_PERIOD: Duration = Duration::from_secs(10);

/// GPS source selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpsMode {
    #[default]
    Auto,
    Gpsd,
    Serial,
    Off,
}

impl std::str::FromStr for GpsMode {
    type Err = GpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "gpsd" => Ok(Self::Gpsd),
            "serial" => Ok(Self::Serial),
            "off" => Ok(Self::Off),
            other => Err(GpsError::InvalidMode(other.to_string())),
        }
    }
}

/// GPS reader configuration.
#[derive(Debug, Clone)]
pub struct GpsConfig {
    pub mode: GpsMode,
    /// gpsd TCP endpoint, e.g. `127.0.0.1:2947`.
    pub gpsd_addr: String,
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    pub serial_device: Option<String>,
    /// Serial baud rate, typically 9600.
    pub serial_baud: u32,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            mode: GpsMode::Auto,
            gpsd_addr: "127.0.0.1:2947".to_string(),
            serial_device: None,
            serial_baud: 9600,
        }
    }
}

impl GpsConfig {
    fn normalized(mut self) -> Self {
        if self.gpsd_addr.trim().is_empty() {
            self.gpsd_addr = "127.0.0.1:2947".to_string();
        }
        if self.serial_baud == 0 {
            self.serial_baud = 9600;
        }
        self.serial_device = self
            .serial_device
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self
    }
}

/// GPS startup errors.
#[derive(Error, Debug)]
pub enum GpsError {
    #[error("invalid gps mode: {0:?} (expected auto|gpsd|serial|off)")]
    InvalidMode(String),

    #[error("gps serial mode requires a device path (e.g., --gps-device /dev/ttyUSB0)")]
    SerialDeviceRequired,

    #[error("gps auto mode: gpsd not reachable at {0} and no serial device detected")]
    AutoUnavailable(String),
}

struct Inner {
    latest_lat: f64,
    latest_lon: f64,
    last_fix: Option<Instant>,
    last_packet: Option<Instant>,
    received: bool,
    scanning_started: bool,
    status: &'static str,
    active_kind: Option<&'static str>,
    // Set while a reader is running; invoked by the watchdog to force a
    // reconnect when packets stop.
    active_closer: Option<Box<dyn Fn() + Send + Sync>>,
}

/// Concurrent GPS fix state shared by every scan task.
pub struct GpsState {
    use_gps: bool,
    timeout: Duration,
    inner: RwLock<Inner>,
}

impl GpsState {
    pub fn new(use_gps: bool, timeout: Duration) -> Self {
        Self {
            use_gps,
            timeout,
            inner: RwLock::new(Inner {
                latest_lat: 0.0,
                latest_lon: 0.0,
                last_fix: None,
                last_packet: None,
                received: !use_gps,
                scanning_started: false,
                status: "offline",
                active_kind: None,
                active_closer: None,
            }),
        }
    }

    /// The active reader kind: `gpsd`, `serial`, or empty.
    pub fn source(&self) -> &'static str {
        self.inner.read().active_kind.unwrap_or("")
    }

    /// Last known fix: `(lat, lon, ok, cached)`. `ok` is true once any fix
    /// was received; `cached` marks a fix older than the freshness timeout.
    pub fn fix_snapshot(&self) -> (f64, f64, bool, bool) {
        let inner = self.inner.read();
        if !self.use_gps {
            return (0.0, 0.0, false, false);
        }
        let Some(last_fix) = inner.last_fix else {
            return (0.0, 0.0, false, false);
        };
        (
            inner.latest_lat,
            inner.latest_lon,
            true,
            last_fix.elapsed() > self.timeout,
        )
    }

    /// Force the active reader to close immediately. Safe to call repeatedly.
    pub fn stop(&self) {
        let inner = self.inner.read();
        if let Some(closer) = &inner.active_closer {
            closer();
        }
    }

    /// Mark that scanning has begun; the watchdog only acts afterwards.
    pub fn set_scanning_started(&self, v: bool) {
        self.inner.write().scanning_started = v;
    }

    /// Wait until at least one GPS packet was received (not necessarily a
    /// valid fix). Returns false when the timeout elapses first.
    pub async fn wait_for_first_packet(&self, token: &CancellationToken, timeout: Duration) -> bool {
        if !self.use_gps {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        loop {
            tokio::select! {
                _ = token.cancelled() => return false,
                _ = ticker.tick() => {
                    if self.inner.read().last_packet.is_some() {
                        return true;
                    }
                    if Instant::now() >= deadline {
                        return false;
                    }
                }
            }
        }
    }

    /// True when the last fix is within the freshness timeout.
    pub fn is_fresh(&self) -> bool {
        if !self.use_gps {
            return false;
        }
        matches!(self.inner.read().last_fix, Some(t) if t.elapsed() <= self.timeout)
    }

    /// `"lat, lon"` only while the fix is fresh.
    pub fn string_if_fresh(&self) -> Option<String> {
        let inner = self.inner.read();
        if !self.use_gps {
            return None;
        }
        let last_fix = inner.last_fix?;
        if last_fix.elapsed() > self.timeout {
            return None;
        }
        Some(format!("{:.6}, {:.6}", inner.latest_lat, inner.latest_lon))
    }

    /// Last known fix for persistence: `"lat, lon"` while fresh,
    /// `"(lat, lon)"` when stale, `None` when never fixed.
    pub fn string_for_record(&self) -> Option<String> {
        let inner = self.inner.read();
        if !self.use_gps {
            return None;
        }
        let last_fix = inner.last_fix?;
        if last_fix.elapsed() <= self.timeout {
            Some(format!("{:.6}, {:.6}", inner.latest_lat, inner.latest_lon))
        } else {
            Some(format!("({:.6}, {:.6})", inner.latest_lat, inner.latest_lon))
        }
    }

    /// Operator-visible status: `online` or `offline`.
    pub fn status(&self) -> &'static str {
        self.inner.read().status
    }

    /// Start the configured reader plus the status and watchdog loops.
    pub fn start(self: &Arc<Self>, token: &CancellationToken, cfg: GpsConfig) -> Result<(), GpsError> {
        if !self.use_gps {
            return Ok(());
        }
        let cfg = cfg.normalized();

        tokio::spawn(Self::status_loop(self.clone(), token.clone()));
        tokio::spawn(Self::watchdog_loop(self.clone(), token.clone()));

        match cfg.mode {
            GpsMode::Off => Ok(()),
            GpsMode::Gpsd => {
                tokio::spawn(gpsd::run_gpsd_loop(self.clone(), token.clone(), cfg.gpsd_addr));
                Ok(())
            }
            GpsMode::Serial => {
                let dev = cfg.serial_device.ok_or(GpsError::SerialDeviceRequired)?;
                tokio::spawn(serial::run_serial_loop(
                    self.clone(),
                    token.clone(),
                    dev,
                    cfg.serial_baud,
                ));
                Ok(())
            }
            GpsMode::Auto => {
                // Prefer gpsd if reachable; otherwise fall back to serial.
                if can_connect_gpsd(&cfg.gpsd_addr, Duration::from_millis(800)) {
                    tokio::spawn(gpsd::run_gpsd_loop(self.clone(), token.clone(), cfg.gpsd_addr));
                    return Ok(());
                }
                let dev = cfg
                    .serial_device
                    .or_else(ports::guess_serial_device)
                    .ok_or(GpsError::AutoUnavailable(cfg.gpsd_addr))?;
                tokio::spawn(serial::run_serial_loop(
                    self.clone(),
                    token.clone(),
                    dev,
                    cfg.serial_baud,
                ));
                Ok(())
            }
        }
    }

    pub(super) fn update_fix(&self, lat: f64, lon: f64) {
        let mut inner = self.inner.write();
        inner.latest_lat = lat;
        inner.latest_lon = lon;
        inner.last_fix = Some(Instant::now());
        inner.received = true;
    }

    pub(super) fn update_packet(&self) {
        self.inner.write().last_packet = Some(Instant::now());
    }

    pub(super) fn set_active_closer(&self, kind: &'static str, closer: Box<dyn Fn() + Send + Sync>) {
        let mut inner = self.inner.write();
        inner.active_kind = Some(kind);
        inner.active_closer = Some(closer);
        // Connection establishment counts as traffic so the watchdog does
        // not close the reader before the first real packet.
        inner.last_packet = Some(Instant::now());
    }

    pub(super) fn clear_active_closer(&self) {
        let mut inner = self.inner.write();
        inner.active_kind = None;
        inner.active_closer = None;
    }

    /// Status loop: once per second, flip online/offline on fix freshness
    /// and log each transition once.
    async fn status_loop(state: Arc<GpsState>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut prev = "";
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let cur = {
                let mut inner = state.inner.write();
                inner.status = if state.use_gps
                    && matches!(inner.last_fix, Some(t) if t.elapsed() <= state.timeout)
                {
                    "online"
                } else {
                    "offline"
                };
                inner.status
            };

            if !prev.is_empty() && cur != prev {
                if cur == "online" {
                    linef!("[GPS]", Color::Green, "signal acquired");
                    tracing::info!("gps: signal acquired");
                } else if let Some(cached) = state.string_for_record() {
                    linef!("[GPS]", Color::Yellow, "signal lost (using last known {cached})");
                    tracing::warn!("gps: signal lost (using last known {cached})");
                } else {
                    linef!("[GPS]", Color::Yellow, "signal lost (no last known fix)");
                    tracing::warn!("gps: signal lost");
                }
            }
            prev = cur;
        }
    }

    /// Watchdog loop: force a reconnect when packets stop arriving, which
    /// handles USB hot-unplug and stalled gpsd/serial streams.
    async fn watchdog_loop(state: Arc<GpsState>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut last_kick: Option<Instant> = None;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let kind = {
                let inner = state.inner.read();
                if !state.use_gps || !inner.scanning_started {
                    continue;
                }
                if inner.active_closer.is_none() {
                    continue;
                }
                let Some(last_packet) = inner.last_packet else {
                    continue;
                };
                if last_packet.elapsed() <= NO_PACKET_TIMEOUT {
                    continue;
                }
                if matches!(last_kick, Some(t) if t.elapsed() < MIN_RECONNECT_PERIOD) {
                    continue;
                }
                inner.active_kind.unwrap_or("")
            };

            last_kick = Some(Instant::now());
            linef!(
                "[GPS]",
                Color::Yellow,
                "no packets for {}s ({kind}) -> reconnecting",
                NO_PACKET_TIMEOUT.as_secs()
            );
            tracing::warn!("gps: no packets for {}s ({kind}) -> reconnecting", NO_PACKET_TIMEOUT.as_secs());
            state.stop();
        }
    }

    #[cfg(test)]
    fn force_fix_at(&self, lat: f64, lon: f64, age: Duration) {
        let mut inner = self.inner.write();
        inner.latest_lat = lat;
        inner.latest_lon = lon;
        inner.last_fix = Some(Instant::now() - age);
        inner.received = true;
    }
}

/// True when a TCP connection to gpsd succeeds within the timeout.
fn can_connect_gpsd(addr: &str, timeout: Duration) -> bool {
    use std::net::ToSocketAddrs;
    let Ok(mut addrs) = addr.to_socket_addrs() else {
        return false;
    };
    let Some(sockaddr) = addrs.next() else {
        return false;
    };
    std::net::TcpStream::connect_timeout(&sockaddr, timeout).is_ok()
}

/// Async dial used by the gpsd reader.
pub(super) async fn dial_gpsd(addr: &str, timeout: Duration) -> std::io::Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(res) => res,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("connect to gpsd {addr} timed out"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_fixed_has_no_record_string() {
        let state = GpsState::new(true, DEFAULT_FRESHNESS_TIMEOUT);
        assert_eq!(state.string_for_record(), None);
        let (_, _, ok, cached) = state.fix_snapshot();
        assert!(!ok);
        assert!(!cached);
    }

    #[test]
    fn fresh_fix_is_plain_stale_fix_is_parenthesized() {
        let state = GpsState::new(true, DEFAULT_FRESHNESS_TIMEOUT);

        state.force_fix_at(37.0, -122.0, Duration::from_secs(100));
        assert_eq!(
            state.string_for_record().as_deref(),
            Some("37.000000, -122.000000")
        );
        assert!(state.is_fresh());
        let (_, _, ok, cached) = state.fix_snapshot();
        assert!(ok);
        assert!(!cached);

        state.force_fix_at(37.0, -122.0, Duration::from_secs(400));
        assert_eq!(
            state.string_for_record().as_deref(),
            Some("(37.000000, -122.000000)")
        );
        assert!(!state.is_fresh());
        assert_eq!(state.string_if_fresh(), None);
        let (_, _, ok, cached) = state.fix_snapshot();
        assert!(ok);
        assert!(cached);
    }

    #[test]
    fn gps_disabled_reports_nothing() {
        let state = GpsState::new(false, DEFAULT_FRESHNESS_TIMEOUT);
        state.update_fix(1.0, 2.0);
        assert_eq!(state.string_for_record(), None);
        assert!(!state.is_fresh());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("auto".parse::<GpsMode>().unwrap(), GpsMode::Auto);
        assert_eq!("GPSD".parse::<GpsMode>().unwrap(), GpsMode::Gpsd);
        assert_eq!("".parse::<GpsMode>().unwrap(), GpsMode::Auto);
        assert!("bogus".parse::<GpsMode>().is_err());
    }
}
