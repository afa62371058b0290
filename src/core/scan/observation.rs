//! Per-device snapshot decoding
//!
//! Each discovery tick asks BlueZ for every known device under an adapter
//! and decodes its property bag into an [`Observation`]: the advertisement
//! fields the persistence layer consumes, plus the full property set as a
//! JSON bag for forensic replay.

use crate::core::catalog::Catalog;
use crate::core::mac::normalize_mac;
use crate::utils::bytes_to_hex;
use bluer::{Adapter, AddressType, DeviceProperty};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Device family as persisted in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFamily {
    Ble,
    Classic,
    Dual,
}

impl DeviceFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ble => "ble",
            Self::Classic => "classic",
            Self::Dual => "dual",
        }
    }
}

/// One manufacturer-specific TLV from the advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManufacturerEntry {
    pub company_id: u16,
    pub data_hex: String,
}

/// One service-data TLV from the advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDataEntry {
    pub uuid: String,
    pub data_hex: String,
}

/// Decoded device state from one snapshot tick.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    /// Canonical MAC.
    pub mac: String,
    /// Raw local name (may be empty; display goes through `safe_name`).
    pub name: String,
    /// Stack marked the address as LE random.
    pub address_random: bool,
    /// Stack reported a BR/EDR address.
    pub bredr_address: bool,
    pub rssi: Option<i16>,
    pub tx_power: Option<i16>,
    /// Advertised service UUIDs, canonical 128-bit lowercase, sorted.
    pub uuids: Vec<String>,
    /// Manufacturer TLVs sorted by company id.
    pub manufacturer: Vec<ManufacturerEntry>,
    /// Service-data TLVs sorted by UUID.
    pub service_data: Vec<ServiceDataEntry>,
    pub class: Option<u32>,
    pub icon: Option<String>,
    pub paired: Option<bool>,
    pub trusted: Option<bool>,
    pub connected: Option<bool>,
    pub blocked: Option<bool>,
    pub legacy_pairing: Option<bool>,
    pub modalias: Option<String>,
    /// Raw UUID list as JSON (for the classic info table).
    pub uuids_json: Option<String>,
    /// Full property bag as JSON for forensic storage.
    pub props_json: Option<String>,
}

impl Observation {
    /// Heuristic: the device is likely Classic (BR/EDR) when the stack
    /// reported a BR/EDR address, a nonzero class of device, or the legacy
    /// pairing flag.
    pub fn is_classic_likely(&self) -> bool {
        if self.bredr_address {
            return true;
        }
        if matches!(self.class, Some(c) if c != 0) {
            return true;
        }
        self.legacy_pairing.unwrap_or(false)
    }

    /// Device family for persistence. A BR/EDR address is `classic`; an LE
    /// address with Classic hints (class, legacy pairing) is `dual`;
    /// everything else is `ble`.
    pub fn family(&self) -> DeviceFamily {
        if self.bredr_address {
            return DeviceFamily::Classic;
        }
        if self.is_classic_likely() {
            return DeviceFamily::Dual;
        }
        DeviceFamily::Ble
    }

    /// TX power formatted with an explicit sign (`+4`, `-18`).
    pub fn tx_power_string(&self) -> Option<String> {
        self.tx_power.map(|v| {
            if v >= 0 {
                format!("+{v}")
            } else {
                format!("{v}")
            }
        })
    }
}

/// Decode a property vector (as returned by `Device::all_properties`) into
/// an [`Observation`] for the given address.
pub fn decode_properties(mac: &str, props: Vec<DeviceProperty>) -> Observation {
    let mut obs = Observation {
        mac: normalize_mac(mac),
        ..Default::default()
    };
    let mut alias = String::new();
    let mut bag: BTreeMap<String, serde_json::Value> = BTreeMap::new();

    for prop in props {
        match prop {
            DeviceProperty::Name(v) => {
                bag.insert("Name".into(), v.clone().into());
                obs.name = v;
            }
            DeviceProperty::Alias(v) => {
                bag.insert("Alias".into(), v.clone().into());
                alias = v;
            }
            DeviceProperty::AddressType(t) => {
                bag.insert("AddressType".into(), t.to_string().into());
                obs.address_random = t == AddressType::LeRandom;
                obs.bredr_address = t == AddressType::BrEdr;
            }
            DeviceProperty::Rssi(v) => {
                bag.insert("RSSI".into(), v.into());
                obs.rssi = Some(v);
            }
            DeviceProperty::TxPower(v) => {
                bag.insert("TxPower".into(), v.into());
                obs.tx_power = Some(v);
            }
            DeviceProperty::Uuids(set) => {
                let mut uuids: Vec<String> = set.iter().map(|u| u.to_string()).collect();
                uuids.sort();
                bag.insert("UUIDs".into(), uuids.clone().into());
                obs.uuids_json = serde_json::to_string(&uuids).ok();
                obs.uuids = uuids;
            }
            DeviceProperty::ManufacturerData(map) => {
                bag.insert("ManufacturerData".into(), manufacturer_bag(&map));
                obs.manufacturer = manufacturer_entries(map);
            }
            DeviceProperty::ServiceData(map) => {
                let mut entries: Vec<ServiceDataEntry> = map
                    .into_iter()
                    .map(|(uuid, data)| ServiceDataEntry {
                        uuid: uuid.to_string(),
                        data_hex: bytes_to_hex(&data),
                    })
                    .collect();
                entries.sort_by(|a, b| a.uuid.cmp(&b.uuid));
                bag.insert(
                    "ServiceData".into(),
                    serde_json::to_value(&entries).unwrap_or_default(),
                );
                obs.service_data = entries;
            }
            DeviceProperty::Class(v) => {
                bag.insert("Class".into(), v.into());
                obs.class = Some(v);
            }
            DeviceProperty::Icon(v) => {
                bag.insert("Icon".into(), v.clone().into());
                obs.icon = Some(v);
            }
            DeviceProperty::Paired(v) => {
                bag.insert("Paired".into(), v.into());
                obs.paired = Some(v);
            }
            DeviceProperty::Trusted(v) => {
                bag.insert("Trusted".into(), v.into());
                obs.trusted = Some(v);
            }
            DeviceProperty::Connected(v) => {
                bag.insert("Connected".into(), v.into());
                obs.connected = Some(v);
            }
            DeviceProperty::Blocked(v) => {
                bag.insert("Blocked".into(), v.into());
                obs.blocked = Some(v);
            }
            DeviceProperty::LegacyPairing(v) => {
                bag.insert("LegacyPairing".into(), v.into());
                obs.legacy_pairing = Some(v);
            }
            DeviceProperty::Modalias(v) => {
                let text = format!("{v:?}");
                bag.insert("Modalias".into(), text.clone().into());
                obs.modalias = Some(text);
            }
            DeviceProperty::ServicesResolved(v) => {
                bag.insert("ServicesResolved".into(), v.into());
            }
            other => {
                // Unhandled properties still land in the forensic bag.
                let text = format!("{other:?}");
                let key = text.split('(').next().unwrap_or("Other").to_string();
                bag.insert(key, serde_json::Value::String(text));
            }
        }
    }

    if obs.name.is_empty() {
        obs.name = alias;
    }
    obs.props_json = serde_json::to_string(&bag).ok();
    obs
}

fn manufacturer_entries(map: HashMap<u16, Vec<u8>>) -> Vec<ManufacturerEntry> {
    let mut entries: Vec<ManufacturerEntry> = map
        .into_iter()
        .map(|(company_id, data)| ManufacturerEntry {
            company_id,
            data_hex: bytes_to_hex(&data),
        })
        .collect();
    entries.sort_by_key(|e| e.company_id);
    entries
}

fn manufacturer_bag(map: &HashMap<u16, Vec<u8>>) -> serde_json::Value {
    let bag: BTreeMap<String, String> = map
        .iter()
        .map(|(k, v)| (format!("0x{k:04X}"), bytes_to_hex(v)))
        .collect();
    serde_json::to_value(bag).unwrap_or_default()
}

/// Snapshot all devices the stack currently tracks under an adapter.
/// Per-device property failures (the device vanished mid-read) skip that
/// device rather than failing the tick.
pub async fn snapshot_adapter(adapter: &Adapter) -> bluer::Result<HashMap<String, Observation>> {
    let addresses = adapter.device_addresses().await?;
    let mut out = HashMap::with_capacity(addresses.len());
    for addr in addresses {
        let Ok(device) = adapter.device(addr) else {
            continue;
        };
        let Ok(props) = device.all_properties().await else {
            continue;
        };
        let obs = decode_properties(&addr.to_string(), props);
        if obs.mac.is_empty() {
            continue;
        }
        out.insert(obs.mac.clone(), obs);
    }
    Ok(out)
}

/// Build the advertisement JSON payload persisted with each device row and
/// advertisement history row.
pub fn build_advertisement_json(
    adapter_id: &str,
    obs: &Observation,
    name: &str,
    annotated_uuids: &[String],
) -> Option<String> {
    let mut payload = serde_json::json!({
        "source": "bluez",
        "adapter": adapter_id,
        "local_name": name.trim(),
        "service_uuids": annotated_uuids,
        "manufacturer": obs.manufacturer,
        "service_data": obs.service_data,
    });
    let map = payload.as_object_mut()?;
    if obs.address_random {
        map.insert("address_type".into(), "random".into());
    } else if obs.bredr_address {
        map.insert("address_type".into(), "bredr".into());
    }
    map.insert("type".into(), obs.family().as_str().into());
    if let Some(rssi) = obs.rssi {
        map.insert("rssi".into(), rssi.into());
    }
    if let Some(tx) = obs.tx_power {
        map.insert("tx_power".into(), tx.into());
    }
    if let Some(class) = obs.class {
        map.insert("class".into(), class.into());
    }
    if let Some(icon) = &obs.icon {
        map.insert("icon".into(), icon.as_str().into());
    }
    serde_json::to_string(&payload).ok()
}

/// Decorate advertised service UUIDs with their catalog names.
pub fn annotate_uuids(catalog: &Catalog, uuids: &[String]) -> Vec<String> {
    uuids
        .iter()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .map(|u| catalog.annotate_service_uuid(u))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_obs() -> Observation {
        Observation {
            mac: "AA:BB:CC:DD:EE:FF".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn le_device_without_classic_hints_is_ble() {
        let obs = base_obs();
        assert!(!obs.is_classic_likely());
        assert_eq!(obs.family(), DeviceFamily::Ble);
    }

    #[test]
    fn bredr_address_is_classic() {
        let obs = Observation {
            bredr_address: true,
            ..base_obs()
        };
        assert!(obs.is_classic_likely());
        assert_eq!(obs.family(), DeviceFamily::Classic);
    }

    #[test]
    fn le_device_with_class_is_dual() {
        let obs = Observation {
            class: Some(0x5a020c),
            ..base_obs()
        };
        assert!(obs.is_classic_likely());
        assert_eq!(obs.family(), DeviceFamily::Dual);
    }

    #[test]
    fn legacy_pairing_marks_classic_likely() {
        let obs = Observation {
            legacy_pairing: Some(true),
            ..base_obs()
        };
        assert!(obs.is_classic_likely());
    }

    #[test]
    fn zero_class_is_not_classic() {
        let obs = Observation {
            class: Some(0),
            ..base_obs()
        };
        assert!(!obs.is_classic_likely());
    }

    #[test]
    fn tx_power_string_signs() {
        let mut obs = base_obs();
        obs.tx_power = Some(4);
        assert_eq!(obs.tx_power_string().as_deref(), Some("+4"));
        obs.tx_power = Some(-18);
        assert_eq!(obs.tx_power_string().as_deref(), Some("-18"));
        obs.tx_power = None;
        assert_eq!(obs.tx_power_string(), None);
    }

    #[test]
    fn manufacturer_entries_sorted_by_company() {
        let map = HashMap::from([(0x4c_u16, vec![0x02, 0x15]), (0x06, vec![0x01])]);
        let entries = manufacturer_entries(map);
        assert_eq!(entries[0].company_id, 0x06);
        assert_eq!(entries[1].company_id, 0x4c);
        assert_eq!(entries[1].data_hex, "02 15");
    }

    #[test]
    fn advertisement_json_shape() {
        let obs = Observation {
            rssi: Some(-60),
            tx_power: Some(4),
            ..base_obs()
        };
        let json = build_advertisement_json("hci0", &obs, "Widget", &[]).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["source"], "bluez");
        assert_eq!(v["adapter"], "hci0");
        assert_eq!(v["local_name"], "Widget");
        assert_eq!(v["rssi"], -60);
        assert_eq!(v["type"], "ble");
    }
}
