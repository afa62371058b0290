//! Host system helpers used by preflight and the status ticker

use regex::Regex;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;

/// True when running as root (effective uid 0).
pub fn is_root() -> bool {
    std::process::Command::new("id")
        .arg("-u")
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "0")
        .unwrap_or(false)
}

/// True when `systemctl` is on PATH.
pub fn has_systemctl() -> bool {
    which("systemctl")
}

fn which(bin: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(bin).is_file())
        })
        .unwrap_or(false)
}

/// Check whether a systemd unit reports `active`.
pub async fn service_is_active(name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() || !has_systemctl() {
        return false;
    }
    let run = Command::new("systemctl")
        .args(["is-active", name])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();
    match tokio::time::timeout(Duration::from_secs(3), run).await {
        Ok(Ok(out)) => String::from_utf8_lossy(&out.stdout).trim() == "active",
        _ => false,
    }
}

/// Restart a systemd unit (best-effort, bounded).
pub async fn restart_service(name: &str) -> std::io::Result<()> {
    let name = name.trim();
    if name.is_empty() || !has_systemctl() {
        return Ok(());
    }
    let run = Command::new("systemctl")
        .args(["restart", name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match tokio::time::timeout(Duration::from_secs(10), run).await {
        Ok(res) => res.map(|_| ()),
        Err(_) => Ok(()),
    }
}

/// Battery charge percent via `acpi -b`, empty when unavailable.
pub fn battery_percent() -> String {
    static PCT_RE: OnceLock<Regex> = OnceLock::new();
    let re = PCT_RE.get_or_init(|| Regex::new(r"(\d{1,3})%").unwrap());

    let out = match std::process::Command::new("acpi").arg("-b").output() {
        Ok(o) => o,
        Err(_) => return String::new(),
    };
    let text = String::from_utf8_lossy(&out.stdout);
    match re.captures(&text) {
        Some(c) => format!("{}%", &c[1]),
        None => String::new(),
    }
}
