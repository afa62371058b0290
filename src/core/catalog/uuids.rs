//! Bluetooth SIG UUID table loader
//!
//! Reads `service_uuids.yaml` / `characteristic_uuids.yaml`:
//!
//! ```yaml
//! uuids:
//!   - uuid: 0x180F
//!     name: Battery Service
//!   - uuid: 6e400001-b5a3-f393-e0a9-e50e24dcca9e
//!     name: Nordic UART Service
//! ```
//!
//! The `uuid` field may be an integer, a `0x`-prefixed hex literal, a bare
//! 4- or 8-hex-char string, or a fully hyphenated 128-bit form. Everything
//! is canonicalized to 128-bit lowercase using the Bluetooth Base UUID.

use super::CatalogError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct UuidFile {
    #[serde(default)]
    uuids: Vec<UuidEntry>,
}

#[derive(Debug, Deserialize)]
struct UuidEntry {
    #[serde(default)]
    uuid: serde_yaml::Value,
    #[serde(default)]
    name: String,
}

/// Load a UUID → name table. Entries with blank uuid or name are ignored,
/// as are entries that fail canonicalization.
pub fn load_uuid_yaml(path: &Path) -> Result<HashMap<String, String>, serde_yaml::Error> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(_) => return Ok(HashMap::new()),
    };
    let file: UuidFile = serde_yaml::from_str(&text)?;

    let mut out = HashMap::with_capacity(file.uuids.len());
    for entry in file.uuids {
        let raw = uuid_value_to_string(&entry.uuid);
        let name = entry.name.trim();
        if raw.is_empty() || name.is_empty() {
            continue;
        }
        if let Ok(canonical) = canonicalize_uuid(&raw) {
            out.insert(canonical, name.to_string());
        }
    }
    Ok(out)
}

fn uuid_value_to_string(v: &serde_yaml::Value) -> String {
    match v {
        serde_yaml::Value::String(s) => s.trim().to_string(),
        serde_yaml::Value::Number(n) => match n.as_u64() {
            Some(u) => format!("0x{u:X}"),
            None => String::new(),
        },
        _ => String::new(),
    }
}

/// Canonicalize a UUID string to 128-bit lowercase form.
///
/// 16-bit and 32-bit forms are extended using the Bluetooth Base UUID
/// `0000xxxx-0000-1000-8000-00805f9b34fb`.
pub fn canonicalize_uuid(s: &str) -> Result<String, CatalogError> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err(CatalogError::BadUuid(s));
    }

    if let Some(hex) = s.strip_prefix("0x") {
        let hex = hex.trim();
        let v = u32::from_str_radix(hex, 16).map_err(|_| CatalogError::BadUuid(s.clone()))?;
        if hex.len() <= 4 {
            return Ok(format!("0000{v:04x}-0000-1000-8000-00805f9b34fb"));
        }
        if hex.len() <= 8 {
            return Ok(format!("{v:08x}-0000-1000-8000-00805f9b34fb"));
        }
        return Err(CatalogError::BadUuid(s));
    }

    match s.len() {
        4 => {
            let v = u16::from_str_radix(&s, 16).map_err(|_| CatalogError::BadUuid(s.clone()))?;
            Ok(format!("0000{v:04x}-0000-1000-8000-00805f9b34fb"))
        }
        8 => {
            let v = u32::from_str_radix(&s, 16).map_err(|_| CatalogError::BadUuid(s.clone()))?;
            Ok(format!("{v:08x}-0000-1000-8000-00805f9b34fb"))
        }
        _ if s.matches('-').count() == 4 => uuid::Uuid::parse_str(&s)
            .map(|u| u.to_string())
            .map_err(|_| CatalogError::BadUuid(s)),
        _ => Err(CatalogError::BadUuid(s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_forms_extend_with_base_uuid() {
        assert_eq!(
            canonicalize_uuid("0x180F").unwrap(),
            "0000180f-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            canonicalize_uuid("2a00").unwrap(),
            "00002a00-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            canonicalize_uuid("0xFDCD1234").unwrap(),
            "fdcd1234-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            canonicalize_uuid("fdcd1234").unwrap(),
            "fdcd1234-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn full_form_lowercased_and_idempotent() {
        let full = "6E400001-B5A3-F393-E0A9-E50E24DCCA9E";
        let canonical = canonicalize_uuid(full).unwrap();
        assert_eq!(canonical, "6e400001-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(canonicalize_uuid(&canonical).unwrap(), canonical);
    }

    #[test]
    fn rejects_garbage() {
        assert!(canonicalize_uuid("").is_err());
        assert!(canonicalize_uuid("xyz").is_err());
        assert!(canonicalize_uuid("0x").is_err());
        assert!(canonicalize_uuid("123").is_err());
    }

    #[test]
    fn yaml_loading_handles_numbers_and_strings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"uuids:\n  - uuid: 0x180F\n    name: Battery Service\n  - uuid: 6157\n    name: Decimal Entry\n  - uuid: \"\"\n    name: Skipped\n  - uuid: 0x1800\n    name: \"\"\n",
        )
        .unwrap();

        let map = load_uuid_yaml(file.path()).unwrap();
        assert_eq!(
            map.get("0000180f-0000-1000-8000-00805f9b34fb").map(String::as_str),
            Some("Battery Service")
        );
        // 6157 decimal == 0x180D
        assert_eq!(
            map.get("0000180d-0000-1000-8000-00805f9b34fb").map(String::as_str),
            Some("Decimal Entry")
        );
        assert_eq!(map.len(), 2);
    }
}
