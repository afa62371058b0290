//! Persistent store for scan results (SQLite)
//!
//! Single-writer semantics: one connection behind a mutex, every operation
//! atomic. Callers on the scan hot path log and swallow write errors; only
//! schema initialization failures are fatal.
//!
//! MAC addresses are normalized to uppercase on every entry point and the
//! `devices.mac` column is unique case-insensitively.

mod schema;

use crate::core::mac::normalize_mac;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Minimum interval between GPS history rows carrying identical text.
const GPS_HISTORY_MIN_INTERVAL: Duration = Duration::from_secs(30);

/// Detection count bumps at most once per this window, in minutes.
const DETECTION_COUNT_WINDOW_MINUTES: i64 = 30;

/// Store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("empty MAC")]
    EmptyMac,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Parameters for [`Store::save_device`]. `None` fields are left untouched
/// on update and stored as NULL on insert.
#[derive(Debug, Default, Clone)]
pub struct SaveParams {
    pub session_id: Option<i64>,
    /// Device family: `ble`, `classic` or `dual`.
    pub device_family: Option<String>,
    pub name: Option<String>,
    pub mac: String,
    pub mac_type: Option<String>,
    pub mac_subtype: Option<String>,
    pub rssi: Option<i64>,
    pub timestamp: Option<String>,
    pub adapter: Option<String>,
    pub manufacturer_data: Option<String>,
    pub manufacturer_name: Option<String>,
    pub service_uuids: Option<String>,
    pub service_data: Option<String>,
    pub tx_power: Option<String>,
    pub platform_data: Option<String>,
    pub advertisement_json: Option<String>,
    pub last_adv_id: Option<i64>,
    pub gps: Option<String>,
    pub service_list: Option<String>,
    pub update_existing: bool,
    pub tag: Option<String>,
    pub marked_type: Option<String>,
}

/// Parameters for [`Store::insert_advertisement`].
#[derive(Debug, Default, Clone)]
pub struct AdvertisementParams {
    pub session_id: Option<i64>,
    pub mac: String,
    pub timestamp: String,
    pub rssi: Option<i64>,
    pub raw: Option<String>,
    pub json: Option<String>,
}

/// Parameters for [`Store::upsert_gatt_characteristic`].
#[derive(Debug, Default, Clone)]
pub struct GattCharacteristicParams {
    pub mac: String,
    pub service_uuid: String,
    pub service_handle: Option<u16>,
    pub char_uuid: String,
    pub char_handle: Option<u16>,
    pub flags_json: Option<String>,
    pub value_hex: Option<String>,
    pub value_ascii: Option<String>,
    pub read_error: Option<String>,
    pub last_read_at: String,
}

/// Parameters for [`Store::upsert_gatt_descriptor`].
#[derive(Debug, Default, Clone)]
pub struct GattDescriptorParams {
    pub mac: String,
    pub service_uuid: String,
    pub char_uuid: String,
    pub desc_uuid: String,
    pub desc_handle: Option<u16>,
    pub flags_json: Option<String>,
    pub value_hex: Option<String>,
    pub value_ascii: Option<String>,
    pub read_error: Option<String>,
    pub last_read_at: String,
}

/// Parameters for [`Store::upsert_classic_info`].
#[derive(Debug, Default, Clone)]
pub struct ClassicInfoParams {
    pub mac: String,
    pub class: Option<u32>,
    pub icon: Option<String>,
    pub paired: Option<bool>,
    pub trusted: Option<bool>,
    pub connected: Option<bool>,
    pub blocked: Option<bool>,
    pub legacy_pairing: Option<bool>,
    pub modalias: Option<String>,
    pub uuids_json: Option<String>,
    pub last_seen: Option<String>,
    pub props_json: Option<String>,
}

/// Parameters for [`Store::insert_classic_discovery`].
#[derive(Debug, Default, Clone)]
pub struct ClassicDiscoveryParams {
    pub session_id: Option<i64>,
    pub mac: String,
    pub timestamp: String,
    pub rssi: Option<i64>,
    pub class: Option<u32>,
    pub props_json: Option<String>,
}

/// Database statistics for the status ticker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Statistics {
    pub total_devices: i64,
    pub named_devices: i64,
    pub devices_with_service: i64,
    pub typed_devices: i64,
}

struct GpsHistEntry {
    text: String,
    written_at: Instant,
}

/// Single-writer SQLite store.
pub struct Store {
    conn: Mutex<Connection>,
    // Last gps_text written to device_gps_history per MAC; avoids a SELECT
    // on every observation.
    gps_hist: Mutex<HashMap<String, GpsHistEntry>>,
}

impl Store {
    /// Open (or create) the database and run schema initialization and
    /// migrations. Migration errors are fatal.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        schema::initialize(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            gps_hist: Mutex::new(HashMap::new()),
        })
    }

    pub fn device_exists(&self, mac: &str) -> StoreResult<bool> {
        let mac = normalize_mac(mac);
        if mac.is_empty() {
            return Ok(false);
        }
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM devices WHERE mac = ?1",
            [&mac],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn has_gatt_services(&self, mac: &str) -> StoreResult<bool> {
        let mac = normalize_mac(mac);
        if mac.is_empty() {
            return Ok(false);
        }
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM gatt_services WHERE mac = ?1 AND service IS NOT NULL AND service != ''",
            [&mac],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Insert or update a device row.
    ///
    /// With `update_existing` set and a row present, only the provided
    /// fields change; `device_family` merges per the dual-promotion rule and
    /// `detection_count` bumps when at least 30 minutes passed since
    /// `last_count_update`. Without a row (or without the flag) this is an
    /// insert-or-ignore with `detection_count = 1`.
    pub fn save_device(&self, mut p: SaveParams) -> StoreResult<()> {
        p.mac = normalize_mac(&p.mac);
        if p.mac.is_empty() {
            return Err(StoreError::EmptyMac);
        }
        let ts = p
            .timestamp
            .clone()
            .unwrap_or_else(crate::utils::now_timestamp);

        let conn = self.conn.lock();

        if p.update_existing {
            let existing = conn
                .query_row(
                    "SELECT detection_count, last_count_update, tag, device_type FROM devices WHERE mac = ?1",
                    [&p.mac],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, Option<String>>(3)?,
                        ))
                    },
                )
                .optional()?;

            if let Some((mut count, last_update, _tag, existing_family)) = existing {
                let family = merge_device_family(
                    existing_family.as_deref().unwrap_or("").trim(),
                    p.device_family.as_deref().unwrap_or("").trim(),
                );

                let mut last_update = last_update.unwrap_or_default();
                if should_bump_detection_count(&last_update, &ts) {
                    count += 1;
                    last_update = ts.clone();
                }

                fn push(
                    fields: &mut Vec<&'static str>,
                    args: &mut Vec<Value>,
                    f: &'static str,
                    v: Value,
                ) {
                    fields.push(f);
                    args.push(v);
                }

                let mut fields: Vec<&'static str> = Vec::with_capacity(20);
                let mut args: Vec<Value> = Vec::with_capacity(20);

                if let Some(v) = &p.name {
                    push(&mut fields, &mut args, "name = ?", Value::from(v.clone()));
                }
                if let Some(v) = &p.mac_type {
                    push(&mut fields, &mut args, "mac_type = ?", Value::from(v.clone()));
                }
                if let Some(v) = &p.mac_subtype {
                    push(&mut fields, &mut args, "mac_subtype = ?", Value::from(v.clone()));
                }
                if let Some(v) = p.session_id {
                    push(&mut fields, &mut args, "session_id = ?", Value::from(v));
                }
                if !family.is_empty() {
                    push(&mut fields, &mut args, "device_type = ?", Value::from(family));
                }
                if let Some(v) = p.rssi {
                    push(&mut fields, &mut args, "rssi = ?", Value::from(v));
                }
                push(&mut fields, &mut args, "timestamp = ?", Value::from(ts.clone()));
                if let Some(v) = &p.adapter {
                    push(&mut fields, &mut args, "adapter = ?", Value::from(v.clone()));
                }
                if let Some(v) = &p.manufacturer_data {
                    push(&mut fields, &mut args, "manufacturer_data = ?", Value::from(v.clone()));
                }
                if let Some(v) = &p.manufacturer_name {
                    push(&mut fields, &mut args, "manufacturer_name = ?", Value::from(v.clone()));
                }
                if let Some(v) = &p.service_uuids {
                    push(&mut fields, &mut args, "service_uuids = ?", Value::from(v.clone()));
                }
                if let Some(v) = &p.service_data {
                    push(&mut fields, &mut args, "service_data = ?", Value::from(v.clone()));
                }
                if let Some(v) = &p.tx_power {
                    push(&mut fields, &mut args, "tx_power = ?", Value::from(v.clone()));
                }
                if let Some(v) = &p.platform_data {
                    push(&mut fields, &mut args, "platform_data = ?", Value::from(v.clone()));
                }
                if let Some(v) = &p.advertisement_json {
                    push(&mut fields, &mut args, "advertisement_json = ?", Value::from(v.clone()));
                }
                if let Some(v) = p.last_adv_id {
                    push(&mut fields, &mut args, "last_adv_id = ?", Value::from(v));
                }
                if let Some(v) = &p.gps {
                    push(&mut fields, &mut args, "gps = ?", Value::from(v.clone()));
                }
                if let Some(v) = &p.service_list {
                    push(&mut fields, &mut args, "service = ?", Value::from(v.clone()));
                }

                push(&mut fields, &mut args, "detection_count = ?", Value::from(count));
                push(&mut fields, &mut args, "last_count_update = ?", Value::from(last_update));

                if let Some(v) = &p.tag {
                    push(&mut fields, &mut args, "tag = ?", Value::from(v.clone()));
                }
                if let Some(v) = &p.marked_type {
                    let v = v.trim();
                    if !v.is_empty() {
                        push(&mut fields, &mut args, "type = ?", Value::from(v.to_string()));
                    }
                }
                args.push(Value::from(p.mac.clone()));

                let query = format!("UPDATE devices SET {} WHERE mac = ?", fields.join(", "));
                conn.execute(&query, rusqlite::params_from_iter(args))?;
                return Ok(());
            }
        }

        conn.execute(
            "
INSERT OR IGNORE INTO devices (
    session_id, device_type, name, mac, mac_type, mac_subtype, rssi, timestamp, adapter,
    manufacturer_data, manufacturer_name, service_uuids, service_data, tx_power, platform_data,
    gps, advertisement_json, last_adv_id, service, detection_count, last_count_update, tag, type
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)
",
            params![
                p.session_id,
                p.device_family,
                p.name,
                p.mac,
                p.mac_type,
                p.mac_subtype,
                p.rssi,
                ts,
                p.adapter,
                p.manufacturer_data,
                p.manufacturer_name,
                p.service_uuids,
                p.service_data,
                p.tx_power,
                p.platform_data,
                p.gps,
                p.advertisement_json,
                p.last_adv_id,
                p.service_list,
                1i64,
                ts,
                p.tag,
                p.marked_type,
            ],
        )?;
        Ok(())
    }

    /// Fast GPS refresh for an existing device, usable inside the device
    /// write-throttle window.
    pub fn update_device_gps(&self, mac: &str, gps_text: &str) -> StoreResult<()> {
        let mac = normalize_mac(mac);
        let gps_text = gps_text.trim();
        if mac.is_empty() || gps_text.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE devices SET gps = ?1 WHERE mac = ?2",
            params![gps_text, mac],
        )?;
        Ok(())
    }

    /// Fast marker-type update for an existing device.
    pub fn update_device_marked_type(&self, mac: &str, marked_type: &str) -> StoreResult<()> {
        let mac = normalize_mac(mac);
        let marked_type = marked_type.trim();
        if mac.is_empty() || marked_type.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE devices SET type = ?1 WHERE mac = ?2",
            params![marked_type, mac],
        )?;
        Ok(())
    }

    /// Append a GPS history row when the text changed or the previous row
    /// for this MAC is older than 30 seconds.
    #[allow(clippy::too_many_arguments)]
    pub fn record_device_gps_history_if_changed(
        &self,
        session_id: Option<i64>,
        mac: &str,
        timestamp: &str,
        lat: Option<f64>,
        lon: Option<f64>,
        gps_text: &str,
        is_cached: bool,
        source: Option<&str>,
    ) -> StoreResult<()> {
        let mac = normalize_mac(mac);
        let gps_text = gps_text.trim();
        if mac.is_empty() || gps_text.is_empty() {
            return Ok(());
        }

        {
            let cache = self.gps_hist.lock();
            if let Some(entry) = cache.get(&mac) {
                if entry.text == gps_text && entry.written_at.elapsed() < GPS_HISTORY_MIN_INTERVAL {
                    return Ok(());
                }
            }
        }

        let conn = self.conn.lock();
        conn.execute(
            "
INSERT INTO device_gps_history (session_id, mac, timestamp, lat, lon, gps_text, is_cached, source)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
",
            params![
                session_id,
                mac,
                timestamp,
                lat,
                lon,
                gps_text,
                is_cached as i64,
                source,
            ],
        )?;
        drop(conn);

        self.gps_hist.lock().insert(
            mac,
            GpsHistEntry {
                text: gps_text.to_string(),
                written_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Replace the composite GATT listing for a device.
    pub fn update_gatt_services(&self, mac: &str, services: &str) -> StoreResult<()> {
        let mac = normalize_mac(mac);
        if mac.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "
INSERT INTO gatt_services (mac, service)
VALUES (?1, ?2)
ON CONFLICT(mac) DO UPDATE SET service = excluded.service
",
            params![mac, services],
        )?;
        Ok(())
    }

    /// Coalescing upsert: keeps previous non-null handles/flags/values when
    /// the new call carries nulls, but always replaces `read_error` and
    /// `last_read_at`.
    pub fn upsert_gatt_characteristic(&self, p: GattCharacteristicParams) -> StoreResult<()> {
        let mac = normalize_mac(&p.mac);
        if mac.is_empty() || p.service_uuid.trim().is_empty() || p.char_uuid.trim().is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "
INSERT INTO gatt_characteristics (
    mac, service_uuid, service_handle, char_uuid, char_handle, flags_json,
    value_hex, value_ascii, read_error, last_read_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
ON CONFLICT(mac, service_uuid, char_uuid) DO UPDATE SET
    service_handle = COALESCE(excluded.service_handle, gatt_characteristics.service_handle),
    char_handle = COALESCE(excluded.char_handle, gatt_characteristics.char_handle),
    flags_json = COALESCE(excluded.flags_json, gatt_characteristics.flags_json),
    value_hex = COALESCE(excluded.value_hex, gatt_characteristics.value_hex),
    value_ascii = COALESCE(excluded.value_ascii, gatt_characteristics.value_ascii),
    read_error = excluded.read_error,
    last_read_at = excluded.last_read_at
",
            params![
                mac,
                p.service_uuid.trim(),
                p.service_handle,
                p.char_uuid.trim(),
                p.char_handle,
                p.flags_json,
                p.value_hex,
                p.value_ascii,
                p.read_error,
                p.last_read_at,
            ],
        )?;
        Ok(())
    }

    /// Descriptor analogue of [`Store::upsert_gatt_characteristic`].
    pub fn upsert_gatt_descriptor(&self, p: GattDescriptorParams) -> StoreResult<()> {
        let mac = normalize_mac(&p.mac);
        if mac.is_empty()
            || p.service_uuid.trim().is_empty()
            || p.char_uuid.trim().is_empty()
            || p.desc_uuid.trim().is_empty()
        {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "
INSERT INTO gatt_descriptors (
    mac, service_uuid, char_uuid, desc_uuid, desc_handle, flags_json,
    value_hex, value_ascii, read_error, last_read_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
ON CONFLICT(mac, service_uuid, char_uuid, desc_uuid) DO UPDATE SET
    desc_handle = COALESCE(excluded.desc_handle, gatt_descriptors.desc_handle),
    flags_json = COALESCE(excluded.flags_json, gatt_descriptors.flags_json),
    value_hex = COALESCE(excluded.value_hex, gatt_descriptors.value_hex),
    value_ascii = COALESCE(excluded.value_ascii, gatt_descriptors.value_ascii),
    read_error = excluded.read_error,
    last_read_at = excluded.last_read_at
",
            params![
                mac,
                p.service_uuid.trim(),
                p.char_uuid.trim(),
                p.desc_uuid.trim(),
                p.desc_handle,
                p.flags_json,
                p.value_hex,
                p.value_ascii,
                p.read_error,
                p.last_read_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_statistics(&self) -> StoreResult<Statistics> {
        let conn = self.conn.lock();
        let total_devices: i64 =
            conn.query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))?;
        let named_devices: i64 = conn.query_row(
            "SELECT COUNT(*) FROM devices WHERE name != 'Unknown'",
            [],
            |row| row.get(0),
        )?;
        let devices_with_service: i64 = conn.query_row(
            "SELECT COUNT(*) FROM devices WHERE service IS NOT NULL AND service != ''",
            [],
            |row| row.get(0),
        )?;
        let typed_devices: i64 = conn.query_row(
            "SELECT COUNT(*) FROM devices WHERE type IS NOT NULL AND TRIM(type) != ''",
            [],
            |row| row.get(0),
        )?;
        Ok(Statistics {
            total_devices,
            named_devices,
            devices_with_service,
            typed_devices,
        })
    }

    /// Create a scan session, returning its id.
    pub fn create_session(
        &self,
        adapter: &str,
        tag: Option<&str>,
        gps_start: Option<&str>,
    ) -> StoreResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO scan_sessions (started_at, adapter, tag, gps_start) VALUES (?1, ?2, ?3, ?4)",
            params![crate::utils::now_timestamp(), adapter, tag, gps_start],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert an advertisement row, resolving `device_id` by MAC and
    /// creating a minimal device stub when missing. Returns the new row id.
    pub fn insert_advertisement(&self, p: AdvertisementParams) -> StoreResult<i64> {
        let mac = normalize_mac(&p.mac);
        if mac.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock();

        let device_id: i64 = match conn
            .query_row("SELECT id FROM devices WHERE mac = ?1", [&mac], |row| {
                row.get(0)
            })
            .optional()?
        {
            Some(id) => id,
            None => {
                let _ = conn.execute(
                    "
INSERT OR IGNORE INTO devices (session_id, device_type, name, mac, rssi, timestamp)
VALUES (?1, 'ble', 'Unknown', ?2, ?3, ?4)
",
                    params![p.session_id, mac, p.rssi, p.timestamp],
                );
                conn.query_row("SELECT id FROM devices WHERE mac = ?1", [&mac], |row| {
                    row.get(0)
                })?
            }
        };

        conn.execute(
            "
INSERT INTO advertisements (session_id, device_id, mac, timestamp, rssi, adv_raw, adv_json)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
",
            params![p.session_id, device_id, mac, p.timestamp, p.rssi, p.raw, p.json],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Link a device back to its most recent advertisement row.
    pub fn update_device_last_adv_id(&self, mac: &str, adv_id: i64) -> StoreResult<()> {
        let mac = normalize_mac(mac);
        if mac.is_empty() || adv_id <= 0 {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE devices SET last_adv_id = ?1 WHERE mac = ?2",
            params![adv_id, mac],
        )?;
        Ok(())
    }

    /// Append-only per-session Classic discovery history.
    pub fn insert_classic_discovery(&self, p: ClassicDiscoveryParams) -> StoreResult<i64> {
        let mac = normalize_mac(&p.mac);
        if mac.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.lock();
        conn.execute(
            "
INSERT INTO classic_discoveries (session_id, mac, timestamp, rssi, class, props_json)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
",
            params![p.session_id, mac, p.timestamp, p.rssi, p.class, p.props_json],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Upsert the latest Classic metadata snapshot, keeping previous
    /// non-null values when the new snapshot carries nulls.
    pub fn upsert_classic_info(&self, p: ClassicInfoParams) -> StoreResult<()> {
        let mac = normalize_mac(&p.mac);
        if mac.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "
INSERT INTO classic_devices (
    mac, class, icon, paired, trusted, connected, blocked, legacy_pairing,
    modalias, uuids, last_seen, props_json
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
ON CONFLICT(mac) DO UPDATE SET
    class = COALESCE(excluded.class, classic_devices.class),
    icon = COALESCE(excluded.icon, classic_devices.icon),
    paired = COALESCE(excluded.paired, classic_devices.paired),
    trusted = COALESCE(excluded.trusted, classic_devices.trusted),
    connected = COALESCE(excluded.connected, classic_devices.connected),
    blocked = COALESCE(excluded.blocked, classic_devices.blocked),
    legacy_pairing = COALESCE(excluded.legacy_pairing, classic_devices.legacy_pairing),
    modalias = COALESCE(excluded.modalias, classic_devices.modalias),
    uuids = COALESCE(excluded.uuids, classic_devices.uuids),
    last_seen = COALESCE(excluded.last_seen, classic_devices.last_seen),
    props_json = COALESCE(excluded.props_json, classic_devices.props_json)
",
            params![
                mac,
                p.class,
                p.icon,
                p.paired.map(|b| b as i64),
                p.trusted.map(|b| b as i64),
                p.connected.map(|b| b as i64),
                p.blocked.map(|b| b as i64),
                p.legacy_pairing.map(|b| b as i64),
                p.modalias,
                p.uuids_json,
                p.last_seen,
                p.props_json,
            ],
        )?;
        Ok(())
    }

    /// Keep the most recent GATT listing per `(session, MAC)`.
    pub fn insert_gatt_services_history(
        &self,
        session_id: i64,
        mac: &str,
        services: &str,
        timestamp: &str,
    ) -> StoreResult<()> {
        let mac = normalize_mac(mac);
        if mac.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "
INSERT INTO gatt_services_history (session_id, mac, timestamp, service)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(session_id, mac) DO UPDATE SET
    timestamp = excluded.timestamp, service = excluded.service
",
            params![session_id, mac, timestamp, services],
        )?;
        Ok(())
    }

    #[cfg(test)]
    fn query_one<T: rusqlite::types::FromSql>(&self, sql: &str, mac: &str) -> T {
        let conn = self.conn.lock();
        conn.query_row(sql, [mac], |row| row.get(0)).unwrap()
    }
}

/// Merge an incoming device family into the stored one: once `dual`, always
/// `dual`; a family conflicting with the stored non-dual value promotes to
/// `dual`; an empty stored family takes the incoming value.
fn merge_device_family(existing: &str, incoming: &str) -> String {
    if incoming.is_empty() {
        return existing.to_string();
    }
    if existing.is_empty() {
        return incoming.to_string();
    }
    if existing.eq_ignore_ascii_case("dual") {
        return existing.to_string();
    }
    if incoming.eq_ignore_ascii_case("dual") || !existing.eq_ignore_ascii_case(incoming) {
        return "dual".to_string();
    }
    existing.to_string()
}

fn should_bump_detection_count(last_update: &str, current: &str) -> bool {
    if last_update.is_empty() {
        return true;
    }
    let prev = NaiveDateTime::parse_from_str(last_update, TIMESTAMP_FORMAT);
    let cur = NaiveDateTime::parse_from_str(current, TIMESTAMP_FORMAT);
    match (prev, cur) {
        (Ok(prev), Ok(cur)) => {
            cur.signed_duration_since(prev) >= chrono::Duration::minutes(DETECTION_COUNT_WINDOW_MINUTES)
        }
        // Unparsable bookkeeping resets the window.
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn save(store: &Store, mac: &str, family: &str, ts: &str, update: bool) {
        store
            .save_device(SaveParams {
                mac: mac.to_string(),
                device_family: Some(family.to_string()),
                name: Some("Test Device".to_string()),
                timestamp: Some(ts.to_string()),
                update_existing: update,
                ..Default::default()
            })
            .unwrap();
    }

    #[test]
    fn device_family_dual_promotion() {
        let store = Store::open_in_memory().unwrap();
        let mac = "AA:BB:CC:DD:EE:01";

        save(&store, mac, "ble", "2026-01-01 10:00:00", false);
        save(&store, mac, "classic", "2026-01-01 10:00:05", true);
        let family: String =
            store.query_one("SELECT device_type FROM devices WHERE mac = ?1", mac);
        assert_eq!(family, "dual");

        // Once dual, always dual.
        save(&store, mac, "ble", "2026-01-01 10:00:10", true);
        let family: String =
            store.query_one("SELECT device_type FROM devices WHERE mac = ?1", mac);
        assert_eq!(family, "dual");
    }

    #[test]
    fn merge_device_family_rules() {
        assert_eq!(merge_device_family("", "ble"), "ble");
        assert_eq!(merge_device_family("ble", ""), "ble");
        assert_eq!(merge_device_family("ble", "ble"), "ble");
        assert_eq!(merge_device_family("ble", "classic"), "dual");
        assert_eq!(merge_device_family("classic", "dual"), "dual");
        assert_eq!(merge_device_family("dual", "classic"), "dual");
    }

    #[test]
    fn detection_count_window() {
        let store = Store::open_in_memory().unwrap();
        let mac = "AA:BB:CC:DD:EE:02";

        save(&store, mac, "ble", "2026-01-01 10:00:00", false);
        let count: i64 =
            store.query_one("SELECT detection_count FROM devices WHERE mac = ?1", mac);
        assert_eq!(count, 1);

        // 10 minutes later: inside the window, unchanged.
        save(&store, mac, "ble", "2026-01-01 10:10:00", true);
        let count: i64 =
            store.query_one("SELECT detection_count FROM devices WHERE mac = ?1", mac);
        assert_eq!(count, 1);

        // 35 minutes after the first save: bumped, window restarts.
        save(&store, mac, "ble", "2026-01-01 10:35:00", true);
        let count: i64 =
            store.query_one("SELECT detection_count FROM devices WHERE mac = ?1", mac);
        assert_eq!(count, 2);
        let last: String =
            store.query_one("SELECT last_count_update FROM devices WHERE mac = ?1", mac);
        assert_eq!(last, "2026-01-01 10:35:00");
    }

    #[test]
    fn save_device_mac_is_case_insensitive() {
        let store = Store::open_in_memory().unwrap();
        save(&store, "aa:bb:cc:dd:ee:03", "ble", "2026-01-01 10:00:00", false);
        save(&store, "AA:BB:CC:DD:EE:03", "ble", "2026-01-01 10:00:05", false);
        let conn = store.conn.lock();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM devices", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn empty_mac_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let err = store.save_device(SaveParams::default()).unwrap_err();
        assert!(matches!(err, StoreError::EmptyMac));
    }

    #[test]
    fn gatt_characteristic_upsert_coalesces() {
        let store = Store::open_in_memory().unwrap();
        let base = GattCharacteristicParams {
            mac: "AA:BB:CC:DD:EE:04".to_string(),
            service_uuid: "0000180f-0000-1000-8000-00805f9b34fb".to_string(),
            char_uuid: "00002a19-0000-1000-8000-00805f9b34fb".to_string(),
            char_handle: Some(42),
            flags_json: Some("[\"read\"]".to_string()),
            value_hex: Some("64".to_string()),
            value_ascii: None,
            read_error: None,
            last_read_at: "2026-01-01 10:00:00".to_string(),
            ..Default::default()
        };
        store.upsert_gatt_characteristic(base.clone()).unwrap();

        // Second pass with nulls for handle/flags/value but a read error.
        store
            .upsert_gatt_characteristic(GattCharacteristicParams {
                char_handle: None,
                flags_json: None,
                value_hex: None,
                read_error: Some("Operation failed".to_string()),
                last_read_at: "2026-01-01 10:05:00".to_string(),
                ..base.clone()
            })
            .unwrap();

        let conn = store.conn.lock();
        let (handle, flags, value, err, at): (i64, String, String, String, String) = conn
            .query_row(
                "SELECT char_handle, flags_json, value_hex, read_error, last_read_at
                 FROM gatt_characteristics WHERE mac = ?1",
                [&base.mac],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .unwrap();
        assert_eq!(handle, 42);
        assert_eq!(flags, "[\"read\"]");
        assert_eq!(value, "64");
        assert_eq!(err, "Operation failed");
        assert_eq!(at, "2026-01-01 10:05:00");
    }

    #[test]
    fn gps_history_collapses_identical_text() {
        let store = Store::open_in_memory().unwrap();
        let mac = "AA:BB:CC:DD:EE:05";
        save(&store, mac, "ble", "2026-01-01 10:00:00", false);

        for _ in 0..5 {
            store
                .record_device_gps_history_if_changed(
                    Some(1),
                    mac,
                    "2026-01-01 10:00:01",
                    Some(37.0),
                    Some(-122.0),
                    "37.000000, -122.000000",
                    false,
                    Some("gpsd"),
                )
                .unwrap();
        }
        let conn = store.conn.lock();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM device_gps_history", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
        drop(conn);

        // Changed text writes immediately.
        store
            .record_device_gps_history_if_changed(
                Some(1),
                mac,
                "2026-01-01 10:00:02",
                Some(37.1),
                Some(-122.0),
                "37.100000, -122.000000",
                false,
                Some("gpsd"),
            )
            .unwrap();
        let conn = store.conn.lock();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM device_gps_history", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn advertisement_insert_creates_device_stub_and_backlink() {
        let store = Store::open_in_memory().unwrap();
        let mac = "AA:BB:CC:DD:EE:06";

        let id = store
            .insert_advertisement(AdvertisementParams {
                session_id: Some(1),
                mac: mac.to_string(),
                timestamp: "2026-01-01 10:00:00".to_string(),
                rssi: Some(-60),
                raw: None,
                json: Some("{}".to_string()),
            })
            .unwrap();
        assert!(id > 0);

        assert!(store.device_exists(mac).unwrap());
        store.update_device_last_adv_id(mac, id).unwrap();

        let conn = store.conn.lock();
        let (dev_id, adv_mac): (i64, String) = conn
            .query_row(
                "SELECT device_id, mac FROM advertisements WHERE id = ?1",
                [id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        let (device_row_id, last_adv): (i64, i64) = conn
            .query_row(
                "SELECT id, last_adv_id FROM devices WHERE mac = ?1",
                [&mac],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(dev_id, device_row_id);
        assert_eq!(adv_mac, mac);
        assert_eq!(last_adv, id);
    }

    #[test]
    fn has_gatt_services_requires_nonempty_listing() {
        let store = Store::open_in_memory().unwrap();
        let mac = "AA:BB:CC:DD:EE:07";
        assert!(!store.has_gatt_services(mac).unwrap());
        store.update_gatt_services(mac, "").unwrap();
        assert!(!store.has_gatt_services(mac).unwrap());
        store
            .update_gatt_services(mac, "Service: 0000180f-0000-1000-8000-00805f9b34fb")
            .unwrap();
        assert!(store.has_gatt_services(mac).unwrap());
    }

    #[test]
    fn tag_preserved_when_not_provided() {
        let store = Store::open_in_memory().unwrap();
        let mac = "AA:BB:CC:DD:EE:08";
        store
            .save_device(SaveParams {
                mac: mac.to_string(),
                tag: Some("survey-1".to_string()),
                timestamp: Some("2026-01-01 10:00:00".to_string()),
                ..Default::default()
            })
            .unwrap();
        save(&store, mac, "ble", "2026-01-01 10:00:05", true);
        let tag: String = store.query_one("SELECT tag FROM devices WHERE mac = ?1", mac);
        assert_eq!(tag, "survey-1");
    }

    #[test]
    fn reopening_schema_is_a_noop() {
        let mut conn = Connection::open_in_memory().unwrap();
        super::schema::initialize(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO devices (mac, name) VALUES ('AA:BB:CC:DD:EE:09', 'Keeper')",
            [],
        )
        .unwrap();
        super::schema::initialize(&mut conn).unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM devices", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn legacy_devices_table_is_rebuilt() {
        let mut conn = Connection::open_in_memory().unwrap();
        // Old shape: legacy columns, duplicate MACs differing in case.
        conn.execute_batch(
            "
CREATE TABLE devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    mac TEXT,
    rssi INTEGER,
    service TEXT,
    timestamp TEXT,
    adapter TEXT,
    manufacturer_data TEXT,
    service_uuids TEXT,
    service_data TEXT,
    tx_power TEXT,
    platform_data TEXT,
    gps TEXT,
    detection_count INTEGER DEFAULT 1,
    advertisement_raw TEXT,
    device_info TEXT
);
INSERT INTO devices (name, mac, rssi) VALUES ('older', 'aa:bb:cc:dd:ee:0a', -70);
INSERT INTO devices (name, mac, rssi) VALUES ('newer', 'AA:BB:CC:DD:EE:0A', -60);

CREATE TABLE advertisements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER,
    mac TEXT,
    timestamp TEXT,
    rssi INTEGER,
    adv_raw TEXT,
    adv_json TEXT
);
INSERT INTO advertisements (mac, rssi) VALUES ('aa:bb:cc:dd:ee:0a', -65);
",
        )
        .unwrap();

        super::schema::initialize(&mut conn).unwrap();

        // One row per MAC remains, with the greatest id and uppercase MAC.
        let (name, mac): (String, String) = conn
            .query_row("SELECT name, mac FROM devices", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(name, "newer");
        assert_eq!(mac, "AA:BB:CC:DD:EE:0A");

        // Legacy columns dropped.
        let legacy: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('devices') WHERE name IN ('advertisement_raw', 'device_info')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(legacy, 0);

        // Advertisements gained a resolved device_id.
        let dev_id: Option<i64> = conn
            .query_row("SELECT device_id FROM advertisements", [], |r| r.get(0))
            .unwrap();
        assert!(dev_id.is_some());

        // Re-running the migration is a no-op.
        super::schema::initialize(&mut conn).unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM devices", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn statistics_counts() {
        let store = Store::open_in_memory().unwrap();
        store
            .save_device(SaveParams {
                mac: "AA:BB:CC:DD:EE:0B".to_string(),
                name: Some("Named".to_string()),
                marked_type: Some("cokeon".to_string()),
                timestamp: Some("2026-01-01 10:00:00".to_string()),
                ..Default::default()
            })
            .unwrap();
        store
            .save_device(SaveParams {
                mac: "AA:BB:CC:DD:EE:0C".to_string(),
                name: Some("Unknown".to_string()),
                timestamp: Some("2026-01-01 10:00:00".to_string()),
                ..Default::default()
            })
            .unwrap();

        let stats = store.get_statistics().unwrap();
        assert_eq!(stats.total_devices, 2);
        assert_eq!(stats.named_devices, 1);
        assert_eq!(stats.typed_devices, 1);
        assert_eq!(stats.devices_with_service, 0);
    }
}
