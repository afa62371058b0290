//! Adapter enumeration and display names
//!
//! The interactive adapter list shows a human-friendly label per
//! controller, derived from the sysfs USB `manufacturer`/`product`
//! attributes of the underlying device.

use bluer::Session;
use regex::Regex;
use std::sync::OnceLock;

/// One host controller visible to the stack.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    /// Controller id, e.g. `hci0`.
    pub id: String,
    /// Label, e.g. `hci0: Realtek Bluetooth 5.4 Radio`.
    pub display_name: String,
    /// Controller address, uppercase.
    pub address: String,
}

fn strict_hci_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^hci\d+$").unwrap())
}

/// List controllers known to the stack, sorted by id.
pub async fn get_bluetooth_interfaces(session: &Session) -> bluer::Result<Vec<InterfaceInfo>> {
    let mut names = session.adapter_names().await?;
    names.sort();

    let mut out = Vec::with_capacity(names.len());
    for id in names {
        // Sub-devices like "hci0:1" are ignored in the UI and DB.
        if !strict_hci_regex().is_match(&id) {
            continue;
        }
        let address = match session.adapter(&id) {
            Ok(adapter) => adapter
                .address()
                .await
                .map(|a| a.to_string().to_uppercase())
                .unwrap_or_default(),
            Err(_) => String::new(),
        };
        out.push(InterfaceInfo {
            display_name: adapter_display_name(&id),
            id,
            address,
        });
    }
    Ok(out)
}

/// Human-friendly adapter label from sysfs USB attributes.
pub fn adapter_display_name(adapter_id: &str) -> String {
    let id = adapter_id.trim();
    if id.is_empty() {
        return String::new();
    }
    if !strict_hci_regex().is_match(id) {
        return id.to_string();
    }

    let (manufacturer, product) = adapter_manufacturer_product(id);
    let label = format!("{manufacturer} {product}");
    let label = label.split_whitespace().collect::<Vec<_>>().join(" ");
    if label.is_empty() {
        format!("{id}: Unknown")
    } else {
        format!("{id}: {label}")
    }
}

fn adapter_manufacturer_product(adapter_id: &str) -> (String, String) {
    // "device" is a symlink; the parent directory holds the USB attributes.
    // The path must be resolved symlink-aware, not lexically cleaned.
    let base = format!("/sys/class/bluetooth/{adapter_id}/device/../");
    (
        read_sysfs_text(&format!("{base}manufacturer")),
        read_sysfs_text(&format!("{base}product")),
    )
}

fn read_sysfs_text(path: &str) -> String {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_devices_pass_through_unchanged() {
        assert_eq!(adapter_display_name("hci0:1"), "hci0:1");
        assert_eq!(adapter_display_name(""), "");
    }

    #[test]
    fn strict_id_matching() {
        assert!(strict_hci_regex().is_match("hci0"));
        assert!(strict_hci_regex().is_match("hci12"));
        assert!(!strict_hci_regex().is_match("hci0:1"));
        assert!(!strict_hci_regex().is_match("eth0"));
    }
}
