//! Shared utilities: console output, prompts, system helpers

pub mod console;
pub mod system;

pub use console::{line, linef_args, Color};

use chrono::Local;
use std::io::{self, BufRead, Write};

/// Current wall-clock timestamp in the store's canonical format.
pub fn now_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Render bytes as lowercase hex pairs separated by spaces (`de ad be ef`).
pub fn bytes_to_hex(b: &[u8]) -> String {
    if b.is_empty() {
        return String::new();
    }
    let mut out = String::with_capacity(b.len() * 3 - 1);
    for (i, v) in b.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{v:02x}"));
    }
    out
}

/// Return the value as ASCII text when every byte is printable
/// (`\n`, `\r`, `\t` whitelisted). Empty input yields `None`.
pub fn ascii_if_printable(b: &[u8]) -> Option<String> {
    if b.is_empty() {
        return None;
    }
    let printable = b
        .iter()
        .all(|&c| (0x20..0x7f).contains(&c) || c == b'\n' || c == b'\r' || c == b'\t');
    if !printable {
        return None;
    }
    String::from_utf8(b.to_vec()).ok()
}

/// Best-effort display name for a device. BlueZ reports the MAC itself as the
/// name for nameless devices; treat that as unknown.
pub fn safe_name(local_name: &str) -> String {
    let name = local_name.trim();
    if name.is_empty() || crate::core::mac::is_mac_address(name) {
        return "Unknown".to_string();
    }
    name.to_string()
}

/// Read a trimmed line from stdin after printing a prompt.
pub fn prompt_string(prompt: &str) -> io::Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Prompt for an integer, falling back to `default` on empty or bad input.
pub fn prompt_int(prompt: &str, default: i64) -> io::Result<i64> {
    let s = prompt_string(prompt)?;
    if s.is_empty() {
        return Ok(default);
    }
    Ok(s.parse().unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_formatting() {
        assert_eq!(bytes_to_hex(&[0xde, 0xad, 0xbe, 0xef]), "de ad be ef");
        assert_eq!(bytes_to_hex(&[]), "");
        assert_eq!(bytes_to_hex(&[0x01]), "01");
    }

    #[test]
    fn ascii_printable() {
        assert_eq!(ascii_if_printable(b"hello\n"), Some("hello\n".to_string()));
        assert_eq!(ascii_if_printable(&[0x00, 0x41]), None);
        assert_eq!(ascii_if_printable(&[]), None);
    }

    #[test]
    fn safe_name_filters_macs() {
        assert_eq!(safe_name("Pixel 8"), "Pixel 8");
        assert_eq!(safe_name(""), "Unknown");
        assert_eq!(safe_name("AA:BB:CC:DD:EE:FF"), "Unknown");
        assert_eq!(safe_name("aa-bb-cc-dd-ee-ff"), "Unknown");
    }
}
