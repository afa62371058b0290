//! Device-type detection patterns
//!
//! Patterns are loaded from `device_types.yaml` (default + optional custom
//! overlay) and matched against each observation. A pattern carries an
//! optional advertised-service-UUID requirement and up to three triggers,
//! any of which tags the device with the pattern's name:
//!
//! 1. iBeacon payload inside the Apple manufacturer TLV
//! 2. manufacturer TLV with a given company id and exact payload length
//! 3. local name that is base64 of exactly five bytes

use crate::core::scan::observation::ManufacturerEntry;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

/// Pattern list loaded from YAML. Immutable after load.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceTypePatterns {
    #[serde(default)]
    pub types: Vec<DeviceTypePattern>,
}

/// One tagging pattern.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceTypePattern {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub require_service_uuid: String,
    #[serde(default)]
    pub ibeacon: IBeaconPattern,
    #[serde(default, rename = "manufacturer_5b")]
    pub manufacturer: ManufacturerLengthPattern,
    #[serde(default)]
    pub name_base64_5b: bool,
}

/// iBeacon trigger: exact UUID + major + minor in an Apple payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IBeaconPattern {
    #[serde(default)]
    pub apple_company_id: u32,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
}

/// Fixed-length manufacturer trigger.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManufacturerLengthPattern {
    #[serde(default)]
    pub company_id: u32,
    #[serde(default)]
    pub length: usize,
}

/// Load patterns from `<data_dir>/default/device_types.yaml` with an
/// optional `<custom_dir>/device_types.yaml` overlay. Missing files are not
/// an error; overlay entries replace defaults with the same lowercased name.
pub fn load_device_type_patterns(data_dir: &Path, custom_dir: Option<&Path>) -> DeviceTypePatterns {
    let default_path = data_dir.join("default").join("device_types.yaml");
    let custom_path = match custom_dir {
        Some(dir) => dir.join("device_types.yaml"),
        None => data_dir.join("custom").join("device_types.yaml"),
    };

    let mut out = DeviceTypePatterns::default();
    merge_patterns_file(&default_path, &mut out);
    merge_patterns_file(&custom_path, &mut out);

    for p in &mut out.types {
        p.name = p.name.trim().to_lowercase();
        p.require_service_uuid = p.require_service_uuid.trim().to_uppercase();
        p.ibeacon.uuid = p.ibeacon.uuid.trim().to_uppercase();
    }
    out
}

fn merge_patterns_file(path: &Path, out: &mut DeviceTypePatterns) {
    let Ok(text) = std::fs::read_to_string(path) else {
        return;
    };
    let Ok(parsed) = serde_yaml::from_str::<DeviceTypePatterns>(&text) else {
        tracing::warn!("ignoring unparsable pattern file {}", path.display());
        return;
    };
    if parsed.types.is_empty() {
        return;
    }

    let mut index: HashMap<String, usize> = out
        .types
        .iter()
        .enumerate()
        .map(|(i, p)| (p.name.trim().to_lowercase(), i))
        .collect();

    for mut pattern in parsed.types {
        let name = pattern.name.trim().to_lowercase();
        if name.is_empty() {
            continue;
        }
        pattern.name = name.clone();
        match index.get(&name) {
            Some(&i) => out.types[i] = pattern,
            None => {
                index.insert(name, out.types.len());
                out.types.push(pattern);
            }
        }
    }
}

fn base64_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").unwrap())
}

/// Run the pattern list against one observation. The first matching trigger
/// of the first matching pattern wins.
pub fn detect_typed_device(
    patterns: &DeviceTypePatterns,
    service_uuids: &[String],
    mfg: &[ManufacturerEntry],
    name: &str,
) -> Option<String> {
    if patterns.types.is_empty() {
        return None;
    }

    let svc_set: Vec<String> = service_uuids
        .iter()
        .map(|u| u.trim().to_uppercase())
        .filter(|u| !u.is_empty())
        .collect();

    for p in &patterns.types {
        if p.name.is_empty() {
            continue;
        }
        if !p.require_service_uuid.is_empty() && !svc_set.iter().any(|u| u == &p.require_service_uuid)
        {
            continue;
        }

        // 1) iBeacon inside the Apple manufacturer payload.
        if !p.ibeacon.uuid.is_empty() && p.ibeacon.apple_company_id > 0 {
            if let Some(payload) = find_manufacturer_bytes(mfg, p.ibeacon.apple_company_id as u16) {
                if payload.len() >= 23 && payload[0] == 0x02 && payload[1] == 0x15 {
                    let uuid = format_uuid(&payload[2..18]);
                    let major = u32::from(u16::from_be_bytes([payload[18], payload[19]]));
                    let minor = u32::from(u16::from_be_bytes([payload[20], payload[21]]));
                    if uuid == p.ibeacon.uuid && major == p.ibeacon.major && minor == p.ibeacon.minor
                    {
                        return Some(p.name.clone());
                    }
                }
            }
        }

        // 2) Manufacturer company id with an exact payload length.
        if p.manufacturer.company_id > 0 && p.manufacturer.length > 0 {
            if let Some(payload) = find_manufacturer_bytes(mfg, p.manufacturer.company_id as u16) {
                if payload.len() == p.manufacturer.length {
                    return Some(p.name.clone());
                }
            }
        }

        // 3) Local name decoding as base64 to exactly 5 bytes.
        if p.name_base64_5b {
            let n = name.trim();
            if !n.is_empty() && n.len() <= 64 && base64_name_regex().is_match(n) {
                if let Ok(raw) = base64::decode(n) {
                    if raw.len() == 5 {
                        return Some(p.name.clone());
                    }
                }
            }
        }
    }
    None
}

fn find_manufacturer_bytes(mfg: &[ManufacturerEntry], company_id: u16) -> Option<Vec<u8>> {
    for entry in mfg {
        if entry.company_id != company_id {
            continue;
        }
        let bytes = parse_hex_bytes(&entry.data_hex);
        if !bytes.is_empty() {
            return Some(bytes);
        }
    }
    None
}

/// Parse either a contiguous hex string or space-separated hex byte pairs.
fn parse_hex_bytes(s: &str) -> Vec<u8> {
    let s = s.trim();
    if s.is_empty() {
        return Vec::new();
    }
    let fields: Vec<&str> = s.split_whitespace().collect();
    if fields.len() == 1 {
        if let Ok(bytes) = hex::decode(fields[0]) {
            return bytes;
        }
    }
    let mut out = Vec::with_capacity(fields.len());
    for f in fields {
        let f = if f.len() == 1 {
            format!("0{f}")
        } else {
            f.to_string()
        };
        match hex::decode(&f) {
            Ok(b) if b.len() == 1 => out.push(b[0]),
            _ => return Vec::new(),
        }
    }
    out
}

/// Format 16 bytes as an uppercase hyphenated UUID (8-4-4-4-12).
fn format_uuid(b: &[u8]) -> String {
    if b.len() != 16 {
        return String::new();
    }
    let h = hex::encode(b).to_uppercase();
    format!(
        "{}-{}-{}-{}-{}",
        &h[0..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..32]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mfg(company_id: u16, data_hex: &str) -> Vec<ManufacturerEntry> {
        vec![ManufacturerEntry {
            company_id,
            data_hex: data_hex.to_string(),
        }]
    }

    fn cokeon_patterns() -> DeviceTypePatterns {
        DeviceTypePatterns {
            types: vec![DeviceTypePattern {
                name: "cokeon".to_string(),
                ibeacon: IBeaconPattern {
                    apple_company_id: 76,
                    uuid: "8AEFB031-6C32-486F-825B-E26FA193487D".to_string(),
                    major: 42,
                    minor: 7,
                },
                ..Default::default()
            }],
        }
    }

    #[test]
    fn ibeacon_exact_match() {
        let patterns = cokeon_patterns();
        let payload = "02 15 8a ef b0 31 6c 32 48 6f 82 5b e2 6f a1 93 48 7d 00 2a 00 07 c5";
        assert_eq!(
            detect_typed_device(&patterns, &[], &mfg(76, payload), ""),
            Some("cokeon".to_string())
        );
    }

    #[test]
    fn ibeacon_wrong_minor_does_not_match() {
        let patterns = cokeon_patterns();
        let payload = "02 15 8a ef b0 31 6c 32 48 6f 82 5b e2 6f a1 93 48 7d 00 2a 00 08 c5";
        assert_eq!(detect_typed_device(&patterns, &[], &mfg(76, payload), ""), None);
    }

    #[test]
    fn manufacturer_length_match() {
        let patterns = DeviceTypePatterns {
            types: vec![DeviceTypePattern {
                name: "vendingtag".to_string(),
                manufacturer: ManufacturerLengthPattern {
                    company_id: 0x0590,
                    length: 5,
                },
                ..Default::default()
            }],
        };
        assert_eq!(
            detect_typed_device(&patterns, &[], &mfg(0x0590, "01 02 03 04 05"), ""),
            Some("vendingtag".to_string())
        );
        assert_eq!(
            detect_typed_device(&patterns, &[], &mfg(0x0590, "01 02 03 04"), ""),
            None
        );
    }

    #[test]
    fn base64_name_match() {
        let patterns = DeviceTypePatterns {
            types: vec![DeviceTypePattern {
                name: "b64tag".to_string(),
                name_base64_5b: true,
                ..Default::default()
            }],
        };
        // "AAAAAAc=" decodes to 5 bytes... base64 of 5 bytes is 8 chars with
        // one '=' pad: e.g. [1,2,3,4,5] -> "AQIDBAU=".
        assert_eq!(
            detect_typed_device(&patterns, &[], &[], "AQIDBAU="),
            Some("b64tag".to_string())
        );
        assert_eq!(detect_typed_device(&patterns, &[], &[], "not base64!"), None);
        // Decodes to 4 bytes.
        assert_eq!(detect_typed_device(&patterns, &[], &[], "AQIDBA=="), None);
    }

    #[test]
    fn require_service_uuid_gates_all_triggers() {
        let mut patterns = cokeon_patterns();
        patterns.types[0].require_service_uuid =
            "0000FEAA-0000-1000-8000-00805F9B34FB".to_string();
        let payload = "02 15 8a ef b0 31 6c 32 48 6f 82 5b e2 6f a1 93 48 7d 00 2a 00 07 c5";

        assert_eq!(detect_typed_device(&patterns, &[], &mfg(76, payload), ""), None);

        let uuids = vec!["0000feaa-0000-1000-8000-00805f9b34fb".to_string()];
        assert_eq!(
            detect_typed_device(&patterns, &uuids, &mfg(76, payload), ""),
            Some("cokeon".to_string())
        );
    }

    #[test]
    fn empty_name_patterns_are_skipped() {
        let mut patterns = cokeon_patterns();
        patterns.types[0].name = String::new();
        let payload = "02 15 8a ef b0 31 6c 32 48 6f 82 5b e2 6f a1 93 48 7d 00 2a 00 07 c5";
        assert_eq!(detect_typed_device(&patterns, &[], &mfg(76, payload), ""), None);
    }

    #[test]
    fn overlay_replaces_default_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let default_dir = dir.path().join("default");
        let custom_dir = dir.path().join("custom");
        std::fs::create_dir_all(&default_dir).unwrap();
        std::fs::create_dir_all(&custom_dir).unwrap();

        std::fs::write(
            default_dir.join("device_types.yaml"),
            "types:\n  - name: CokeON\n    manufacturer_5b:\n      company_id: 76\n      length: 5\n  - name: keeper\n    name_base64_5b: true\n",
        )
        .unwrap();
        std::fs::write(
            custom_dir.join("device_types.yaml"),
            "types:\n  - name: cokeon\n    manufacturer_5b:\n      company_id: 76\n      length: 9\n",
        )
        .unwrap();

        let patterns = load_device_type_patterns(dir.path(), None);
        assert_eq!(patterns.types.len(), 2);
        let cokeon = patterns.types.iter().find(|p| p.name == "cokeon").unwrap();
        assert_eq!(cokeon.manufacturer.length, 9);
        assert!(patterns.types.iter().any(|p| p.name == "keeper"));
    }

    #[test]
    fn hex_byte_parsing() {
        assert_eq!(parse_hex_bytes("02 15 ff"), vec![0x02, 0x15, 0xff]);
        assert_eq!(parse_hex_bytes("0215ff"), vec![0x02, 0x15, 0xff]);
        assert_eq!(parse_hex_bytes("2 15"), vec![0x02, 0x15]);
        assert!(parse_hex_bytes("zz").is_empty());
        assert!(parse_hex_bytes("").is_empty());
    }

    #[test]
    fn uuid_formatting() {
        let bytes: Vec<u8> = (0..16).collect();
        assert_eq!(
            format_uuid(&bytes),
            "00010203-0405-0607-0809-0A0B0C0D0E0F"
        );
        assert_eq!(format_uuid(&[0u8; 4]), "");
    }
}
