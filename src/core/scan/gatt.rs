//! GATT database dumper
//!
//! Walks a connected device's services, characteristics and descriptors in
//! stable (handle) order, reads readable values within a bounded budget,
//! upserts structured rows, and assembles the human-readable listing that
//! is stored as the device's composite service text.

use super::ScanError;
use crate::core::catalog::Catalog;
use crate::core::store::{GattCharacteristicParams, GattDescriptorParams, Store};
use crate::utils::{ascii_if_printable, bytes_to_hex, now_timestamp};
use bluer::gatt::remote::{Characteristic, Descriptor, Service};
use bluer::gatt::{CharacteristicFlags, DescriptorFlags};
use bluer::Device;
use std::time::Duration;

/// Limits that keep pathological devices from stalling a connect worker.
const MAX_CHARS_TO_READ: usize = 40;
const PER_READ_TIMEOUT: Duration = Duration::from_millis(900);

/// Dump the GATT database of a connected, services-resolved device.
/// Returns the listing text and the best-effort device name.
pub async fn dump_and_store_gatt(
    device: &Device,
    mac: &str,
    store: &Store,
    catalog: &Catalog,
) -> Result<(String, String), ScanError> {
    let name = device_name(device).await;

    let mut services = device.services().await?;
    if services.is_empty() {
        return Err(ScanError::NoGattServices);
    }
    services.sort_by_key(Service::id);

    let now = now_timestamp();
    let mut lines: Vec<String> = Vec::with_capacity(256);
    let mut read_count = 0usize;

    for service in services {
        let service_uuid = match service.uuid().await {
            Ok(u) => u.to_string(),
            Err(_) => continue,
        };
        let service_handle = service.id();
        lines.push(format!(
            "Service: {}",
            catalog.annotate_service_uuid(&service_uuid)
        ));

        let mut chars = service.characteristics().await.unwrap_or_default();
        chars.sort_by_key(Characteristic::id);

        for ch in chars {
            let char_uuid = match ch.uuid().await {
                Ok(u) => u.to_string(),
                Err(_) => continue,
            };
            lines.push(format!(
                "  ├─ Characteristic: {}",
                catalog.annotate_characteristic_uuid(&char_uuid)
            ));

            let flags = ch.flags().await.unwrap_or_default();
            let flag_names = characteristic_flag_names(&flags);
            lines.push(format!("  │  Properties: {}", flags_label(&flag_names)));

            let mut value_hex = None;
            let mut value_ascii = None;
            let mut read_error = None;
            if flags.read {
                if read_count < MAX_CHARS_TO_READ {
                    read_count += 1;
                    match tokio::time::timeout(PER_READ_TIMEOUT, ch.read()).await {
                        Ok(Ok(value)) => {
                            let h = bytes_to_hex(&value);
                            lines.push(format!("  │  Value(hex): {h}"));
                            if let Some(text) = ascii_if_printable(&value) {
                                lines.push(format!("  │  Value(ascii): {text}"));
                                value_ascii = Some(text);
                            }
                            value_hex = Some(h);
                        }
                        Ok(Err(e)) => {
                            lines.push(format!("  │  Read error: {e}"));
                            read_error = Some(e.to_string());
                        }
                        Err(_) => {
                            let msg = format!("read timed out after {}ms", PER_READ_TIMEOUT.as_millis());
                            lines.push(format!("  │  Read error: {msg}"));
                            read_error = Some(msg);
                        }
                    }
                } else {
                    lines.push("  │  Value: (skipped; read limit reached)".to_string());
                }
            }

            let _ = store.upsert_gatt_characteristic(GattCharacteristicParams {
                mac: mac.to_string(),
                service_uuid: service_uuid.clone(),
                service_handle: Some(service_handle),
                char_uuid: char_uuid.clone(),
                char_handle: Some(ch.id()),
                flags_json: flags_json(&flag_names),
                value_hex,
                value_ascii,
                read_error,
                last_read_at: now.clone(),
            });

            let mut descriptors = ch.descriptors().await.unwrap_or_default();
            descriptors.sort_by_key(Descriptor::id);

            for desc in descriptors {
                let desc_uuid = match desc.uuid().await {
                    Ok(u) => u.to_string(),
                    Err(_) => continue,
                };
                lines.push(format!("  │  Descriptor: {desc_uuid}"));

                let dflags = desc.flags().await.unwrap_or_default();
                let dflag_names = descriptor_flag_names(&dflags);
                lines.push(format!("  │    Properties: {}", flags_label(&dflag_names)));

                let mut d_hex = None;
                let mut d_ascii = None;
                let mut d_error = None;
                if dflags.read {
                    match tokio::time::timeout(PER_READ_TIMEOUT, desc.read()).await {
                        Ok(Ok(value)) => {
                            let h = bytes_to_hex(&value);
                            lines.push(format!("  │    Value(hex): {h}"));
                            if let Some(text) = ascii_if_printable(&value) {
                                lines.push(format!("  │    Value(ascii): {text}"));
                                d_ascii = Some(text);
                            }
                            d_hex = Some(h);
                        }
                        Ok(Err(e)) => {
                            lines.push(format!("  │    Read error: {e}"));
                            d_error = Some(e.to_string());
                        }
                        Err(_) => {
                            let msg = format!("read timed out after {}ms", PER_READ_TIMEOUT.as_millis());
                            lines.push(format!("  │    Read error: {msg}"));
                            d_error = Some(msg);
                        }
                    }
                }

                let _ = store.upsert_gatt_descriptor(GattDescriptorParams {
                    mac: mac.to_string(),
                    service_uuid: service_uuid.clone(),
                    char_uuid: char_uuid.clone(),
                    desc_uuid,
                    desc_handle: Some(desc.id()),
                    flags_json: flags_json(&dflag_names),
                    value_hex: d_hex,
                    value_ascii: d_ascii,
                    read_error: d_error,
                    last_read_at: now.clone(),
                });
            }

            lines.push("  └─────────────────────────────────".to_string());
        }
    }

    Ok((lines.join("\n"), name))
}

async fn device_name(device: &Device) -> String {
    if let Ok(alias) = device.alias().await {
        let alias = alias.trim().to_string();
        if !alias.is_empty() {
            return alias;
        }
    }
    if let Ok(Some(name)) = device.name().await {
        let name = name.trim().to_string();
        if !name.is_empty() {
            return name;
        }
    }
    "Unknown".to_string()
}

fn flags_label(names: &[&'static str]) -> String {
    if names.is_empty() {
        "(unknown)".to_string()
    } else {
        names.join(", ")
    }
}

fn flags_json(names: &[&'static str]) -> Option<String> {
    serde_json::to_string(names).ok()
}

fn characteristic_flag_names(f: &CharacteristicFlags) -> Vec<&'static str> {
    let mut out = Vec::new();
    if f.broadcast {
        out.push("broadcast");
    }
    if f.read {
        out.push("read");
    }
    if f.write_without_response {
        out.push("write-without-response");
    }
    if f.write {
        out.push("write");
    }
    if f.notify {
        out.push("notify");
    }
    if f.indicate {
        out.push("indicate");
    }
    if f.authenticated_signed_writes {
        out.push("authenticated-signed-writes");
    }
    if f.extended_properties {
        out.push("extended-properties");
    }
    if f.reliable_write {
        out.push("reliable-write");
    }
    if f.writable_auxiliaries {
        out.push("writable-auxiliaries");
    }
    if f.encrypt_read {
        out.push("encrypt-read");
    }
    if f.encrypt_write {
        out.push("encrypt-write");
    }
    out
}

fn descriptor_flag_names(f: &DescriptorFlags) -> Vec<&'static str> {
    let mut out = Vec::new();
    if f.read {
        out.push("read");
    }
    if f.write {
        out.push("write");
    }
    if f.encrypt_read {
        out.push("encrypt-read");
    }
    if f.encrypt_write {
        out.push("encrypt-write");
    }
    if f.authorize {
        out.push("authorize");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_labels() {
        assert_eq!(flags_label(&[]), "(unknown)");
        assert_eq!(flags_label(&["read", "notify"]), "read, notify");
    }

    #[test]
    fn flag_json_round_trip() {
        let json = flags_json(&["read", "write"]).unwrap();
        let parsed: Vec<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, vec!["read", "write"]);
    }

    #[test]
    fn characteristic_flags_mapping() {
        let mut flags = CharacteristicFlags::default();
        flags.read = true;
        flags.notify = true;
        assert_eq!(characteristic_flag_names(&flags), vec!["read", "notify"]);
    }
}
