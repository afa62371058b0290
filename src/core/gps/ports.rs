//! Serial port enumeration and GPS device autodetection

use std::path::Path;

/// List serial device paths. On Linux, USB GPS adapters typically appear as
/// `/dev/ttyUSB*` or `/dev/ttyACM*`.
pub fn list_serial_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(_) => Vec::new(),
    }
}

/// Guess a likely GPS serial device. Preference order:
/// stable `/dev/serial/by-id` symlinks, enumerated ports, then the usual
/// Linux candidates. Empty result means nothing was detected.
pub fn guess_serial_device() -> Option<String> {
    if let Ok(entries) = std::fs::read_dir("/dev/serial/by-id") {
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path().to_string_lossy().to_string())
            .collect();
        names.sort();
        if let Some(first) = names.into_iter().next() {
            return Some(first);
        }
    }

    let ports = list_serial_ports();
    if let Some(first) = ports.into_iter().next() {
        return Some(first);
    }

    for candidate in ["/dev/ttyACM0", "/dev/ttyUSB0", "/dev/ttyAMA0"] {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
    }
    None
}
