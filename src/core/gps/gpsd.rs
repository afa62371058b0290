//! gpsd TCP reader
//!
//! Connects to gpsd, enables watcher mode, and consumes newline-delimited
//! JSON reports. Only `TPV` records with `mode >= 2` and both coordinates
//! present update the fix.

use super::GpsState;
use crate::linef;
use crate::utils::console::Color;
use serde::Deserialize;
use std::io::{Error, ErrorKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

/// gpsd JSON records can exceed the usual line length in some modes.
const MAX_LINE_BYTES: usize = 256 * 1024;

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true}\n";

#[derive(Debug, Deserialize)]
struct TpvRecord {
    #[serde(default)]
    class: String,
    mode: Option<i64>,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Outer gpsd loop: connect, read until failure, back off 2 s, repeat.
pub(super) async fn run_gpsd_loop(state: Arc<GpsState>, token: CancellationToken, addr: String) {
    let mut connected = false;
    loop {
        if token.is_cancelled() {
            return;
        }
        if !connected {
            linef!("[GPS]", Color::Gray, "connecting to gpsd {addr}");
            tracing::info!("gps: connecting to gpsd {addr}");
        }
        connected = true;

        match read_gpsd(&state, &token, &addr).await {
            Ok(()) => return,
            Err(e) => {
                connected = false;
                linef!("[GPS]", Color::Yellow, "gpsd disconnected: {e}");
                tracing::warn!("gps: gpsd disconnected: {e}");
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                }
            }
        }
    }
}

/// One gpsd connection. `Ok(())` means the root token was cancelled;
/// any error makes the outer loop reconnect.
async fn read_gpsd(state: &Arc<GpsState>, token: &CancellationToken, addr: &str) -> std::io::Result<()> {
    let mut stream = super::dial_gpsd(addr, Duration::from_secs(2)).await?;

    let conn_token = CancellationToken::new();
    state.set_active_closer("gpsd", {
        let t = conn_token.clone();
        Box::new(move || t.cancel())
    });

    let result = async {
        stream.write_all(WATCH_COMMAND).await?;

        let mut reader = BufReader::new(stream);
        let mut buf: Vec<u8> = Vec::with_capacity(64 * 1024);
        loop {
            buf.clear();
            let n = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = conn_token.cancelled() => {
                    return Err(Error::new(ErrorKind::ConnectionAborted, "reader closed by watchdog"));
                }
                n = reader.read_until(b'\n', &mut buf) => n?,
            };
            if n == 0 {
                return Err(Error::new(ErrorKind::UnexpectedEof, "gpsd connection closed"));
            }
            if buf.len() > MAX_LINE_BYTES {
                continue;
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            state.update_packet();

            let Ok(tpv) = serde_json::from_str::<TpvRecord>(line) else {
                continue;
            };
            if tpv.class != "TPV" {
                continue;
            }
            if tpv.mode.unwrap_or(0) < 2 {
                continue;
            }
            let (Some(lat), Some(lon)) = (tpv.lat, tpv.lon) else {
                continue;
            };
            state.update_fix(lat, lon);
        }
    }
    .await;

    state.clear_active_closer();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tpv_decoding() {
        let tpv: TpvRecord =
            serde_json::from_str(r#"{"class":"TPV","mode":3,"lat":48.1,"lon":11.5,"alt":540.0}"#)
                .unwrap();
        assert_eq!(tpv.class, "TPV");
        assert_eq!(tpv.mode, Some(3));
        assert_eq!(tpv.lat, Some(48.1));
    }

    #[test]
    fn non_tpv_classes_tolerated() {
        let rec: TpvRecord =
            serde_json::from_str(r#"{"class":"SKY","satellites":[]}"#).unwrap();
        assert_eq!(rec.class, "SKY");
        assert_eq!(rec.mode, None);
    }
}
