//! NMEA serial reader
//!
//! The serial port is read on a blocking thread with a short read timeout.
//! Cancellation and the watchdog both flip a shared stop flag from outside
//! the blocked read, which the loop observes at the next timeout tick; this
//! is the close-from-another-task pattern the gpsd reader uses with its
//! connection token.

use super::{nmea, ports, GpsState};
use crate::linef;
use crate::utils::console::Color;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Poll interval for the stop flag while the port is quiet.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Discard accumulated junk beyond this size (no newline seen).
const MAX_PENDING_BYTES: usize = 4096;

/// Outer serial loop: open, read until failure, re-probe the device path on
/// error (hot-plug support), back off 2 s, repeat.
pub(super) async fn run_serial_loop(
    state: Arc<GpsState>,
    token: CancellationToken,
    device: String,
    baud: u32,
) {
    let mut dev_path = device;
    let mut connected = false;
    loop {
        if token.is_cancelled() {
            return;
        }
        if !connected {
            linef!("[GPS]", Color::Gray, "opening serial {dev_path} ({baud} baud)");
            tracing::info!("gps: opening serial {dev_path} ({baud} baud)");
        }
        connected = true;

        match read_serial(&state, &token, dev_path.clone(), baud).await {
            Ok(()) => return,
            Err(e) => {
                connected = false;
                linef!("[GPS]", Color::Yellow, "serial disconnected: {e}");
                tracing::warn!("gps: serial disconnected: {e}");

                // The device path may disappear or change on replug.
                if let Some(guessed) = ports::guess_serial_device() {
                    if guessed != dev_path {
                        linef!("[GPS]", Color::Gray, "serial device changed -> {guessed}");
                        tracing::info!("gps: serial device changed -> {guessed}");
                        dev_path = guessed;
                    }
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                }
            }
        }
    }
}

/// One serial session. `Ok(())` means the root token was cancelled; any
/// error makes the outer loop reconnect.
async fn read_serial(
    state: &Arc<GpsState>,
    token: &CancellationToken,
    device: String,
    baud: u32,
) -> std::io::Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    state.set_active_closer("serial", {
        let s = stop.clone();
        Box::new(move || s.store(true, Ordering::SeqCst))
    });

    // Unblock the blocking read loop when the root token fires.
    let unblocker = tokio::spawn({
        let token = token.clone();
        let stop = stop.clone();
        async move {
            token.cancelled().await;
            stop.store(true, Ordering::SeqCst);
        }
    });

    let reader_state = state.clone();
    let reader_stop = stop.clone();
    let result = tokio::task::spawn_blocking(move || {
        read_serial_blocking(&reader_state, &reader_stop, &device, baud)
    })
    .await;

    unblocker.abort();
    state.clear_active_closer();

    match result {
        Ok(Ok(())) => {
            if token.is_cancelled() {
                Ok(())
            } else {
                // Watchdog kicked the reader; surface as an error so the
                // outer loop reconnects.
                Err(std::io::Error::new(
                    ErrorKind::ConnectionAborted,
                    "reader closed by watchdog",
                ))
            }
        }
        Ok(Err(e)) => Err(e),
        Err(join) => Err(std::io::Error::new(ErrorKind::Other, join.to_string())),
    }
}

fn read_serial_blocking(
    state: &Arc<GpsState>,
    stop: &Arc<AtomicBool>,
    device: &str,
    baud: u32,
) -> std::io::Result<()> {
    let mut port = serialport::new(device, baud)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|e| std::io::Error::new(ErrorKind::Other, e.to_string()))?;

    let mut pending: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 512];

    loop {
        if stop.load(Ordering::SeqCst) {
            return Ok(());
        }
        match port.read(&mut chunk) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "serial reader stopped",
                ));
            }
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                    let line_bytes: Vec<u8> = pending.drain(..=pos).collect();
                    process_line(state, &line_bytes);
                }
                if pending.len() > MAX_PENDING_BYTES {
                    pending.clear();
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

fn process_line(state: &Arc<GpsState>, raw: &[u8]) {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim().trim_end_matches('\r');
    if line.is_empty() {
        return;
    }
    // Not NMEA/AIS.
    if !line.starts_with('$') && !line.starts_with('!') {
        return;
    }
    state.update_packet();

    let Ok(sentence) = nmea::parse(line) else {
        return;
    };
    if let Some((lat, lon)) = sentence.valid_fix() {
        state.update_fix(lat, lon);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gps::DEFAULT_FRESHNESS_TIMEOUT;

    #[test]
    fn nmea_lines_update_state() {
        let state = Arc::new(GpsState::new(true, DEFAULT_FRESHNESS_TIMEOUT));
        process_line(
            &state,
            b"$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n",
        );
        let (lat, _, ok, cached) = state.fix_snapshot();
        assert!(ok);
        assert!(!cached);
        assert!((lat - 48.1173).abs() < 0.001);
    }

    #[test]
    fn non_nmea_lines_are_not_packets() {
        let state = Arc::new(GpsState::new(true, DEFAULT_FRESHNESS_TIMEOUT));
        process_line(&state, b"boot: u-blox 7\r\n");
        let (_, _, ok, _) = state.fix_snapshot();
        assert!(!ok);
    }
}
