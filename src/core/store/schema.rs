//! Schema creation and in-place migrations
//!
//! `initialize` is idempotent: it creates missing tables and indices, adds
//! columns that older databases lack, and rebuilds tables whose legacy shape
//! cannot be patched with `ALTER TABLE` (SQLite does not guarantee
//! `DROP COLUMN`). Migration failures abort the open.

use rusqlite::Connection;
use std::collections::HashSet;

const CREATE_DEVICES: &str = "
CREATE TABLE IF NOT EXISTS devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER,
    device_type TEXT,
    name TEXT,
    mac TEXT UNIQUE COLLATE NOCASE,
    mac_type TEXT,
    mac_subtype TEXT,
    rssi INTEGER,
    service TEXT,
    timestamp TEXT,
    adapter TEXT,
    manufacturer_data TEXT,
    manufacturer_name TEXT,
    service_uuids TEXT,
    service_data TEXT,
    tx_power TEXT,
    platform_data TEXT,
    advertisement_json TEXT,
    last_adv_id INTEGER,
    gps TEXT,
    detection_count INTEGER DEFAULT 1,
    last_count_update TEXT,
    tag TEXT,
    type TEXT
);
";

const CREATE_CLASSIC_DEVICES: &str = "
CREATE TABLE IF NOT EXISTS classic_devices (
    mac TEXT PRIMARY KEY,
    class INTEGER,
    icon TEXT,
    paired INTEGER,
    trusted INTEGER,
    connected INTEGER,
    blocked INTEGER,
    legacy_pairing INTEGER,
    modalias TEXT,
    uuids TEXT,
    last_seen TEXT,
    props_json TEXT
);
";

const CREATE_CLASSIC_DISCOVERIES: &str = "
CREATE TABLE IF NOT EXISTS classic_discoveries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER,
    mac TEXT,
    timestamp TEXT,
    rssi INTEGER,
    class INTEGER,
    props_json TEXT
);
";

const CREATE_GATT_SERVICES: &str = "
CREATE TABLE IF NOT EXISTS gatt_services (
    mac TEXT PRIMARY KEY,
    service TEXT
);
";

const CREATE_GATT_CHARACTERISTICS: &str = "
CREATE TABLE IF NOT EXISTS gatt_characteristics (
    mac TEXT,
    service_uuid TEXT,
    service_handle INTEGER,
    char_uuid TEXT,
    char_handle INTEGER,
    flags_json TEXT,
    value_hex TEXT,
    value_ascii TEXT,
    read_error TEXT,
    last_read_at TEXT,
    PRIMARY KEY (mac, service_uuid, char_uuid)
);
";

const CREATE_GATT_DESCRIPTORS: &str = "
CREATE TABLE IF NOT EXISTS gatt_descriptors (
    mac TEXT,
    service_uuid TEXT,
    char_uuid TEXT,
    desc_uuid TEXT,
    desc_handle INTEGER,
    flags_json TEXT,
    value_hex TEXT,
    value_ascii TEXT,
    read_error TEXT,
    last_read_at TEXT,
    PRIMARY KEY (mac, service_uuid, char_uuid, desc_uuid)
);
";

const CREATE_SCAN_SESSIONS: &str = "
CREATE TABLE IF NOT EXISTS scan_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT,
    adapter TEXT,
    tag TEXT,
    gps_start TEXT
);
";

const CREATE_ADVERTISEMENTS: &str = "
CREATE TABLE IF NOT EXISTS advertisements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER,
    device_id INTEGER,
    mac TEXT,
    timestamp TEXT,
    rssi INTEGER,
    adv_raw TEXT,
    adv_json TEXT,
    FOREIGN KEY(device_id) REFERENCES devices(id) ON DELETE CASCADE
);
";

const CREATE_GATT_SERVICES_HISTORY: &str = "
CREATE TABLE IF NOT EXISTS gatt_services_history (
    session_id INTEGER,
    mac TEXT,
    timestamp TEXT,
    service TEXT,
    PRIMARY KEY (session_id, mac)
);
";

const CREATE_DEVICE_GPS_HISTORY: &str = "
CREATE TABLE IF NOT EXISTS device_gps_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER,
    mac TEXT NOT NULL,
    timestamp TEXT,
    lat REAL,
    lon REAL,
    gps_text TEXT,
    is_cached INTEGER,
    source TEXT,
    FOREIGN KEY(mac) REFERENCES devices(mac) ON DELETE CASCADE
);
";

/// Create the schema and run pending migrations.
pub fn initialize(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_DEVICES)?;

    // Backward-compatible column additions for old databases. Failures mean
    // the column already exists.
    for alter in [
        "ALTER TABLE devices ADD COLUMN service TEXT",
        "ALTER TABLE devices ADD COLUMN session_id INTEGER",
        "ALTER TABLE devices ADD COLUMN device_type TEXT",
        "ALTER TABLE devices ADD COLUMN manufacturer_name TEXT",
        "ALTER TABLE devices ADD COLUMN advertisement_json TEXT",
        "ALTER TABLE devices ADD COLUMN last_adv_id INTEGER",
        "ALTER TABLE devices ADD COLUMN mac_type TEXT",
        "ALTER TABLE devices ADD COLUMN mac_subtype TEXT",
        "ALTER TABLE devices ADD COLUMN last_count_update TEXT",
        "ALTER TABLE devices ADD COLUMN tag TEXT",
        "ALTER TABLE devices ADD COLUMN type TEXT",
    ] {
        let _ = conn.execute(alter, []);
    }

    migrate_devices_if_needed(conn)?;

    conn.execute_batch(CREATE_CLASSIC_DEVICES)?;
    conn.execute_batch(CREATE_CLASSIC_DISCOVERIES)?;
    conn.execute_batch(CREATE_GATT_SERVICES)?;
    conn.execute_batch(CREATE_GATT_CHARACTERISTICS)?;
    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_gatt_chars_mac ON gatt_characteristics(mac)",
        [],
    );
    conn.execute_batch(CREATE_GATT_DESCRIPTORS)?;
    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_gatt_desc_mac ON gatt_descriptors(mac)",
        [],
    );
    conn.execute_batch(CREATE_SCAN_SESSIONS)?;
    conn.execute_batch(CREATE_ADVERTISEMENTS)?;
    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_advertisements_device_id ON advertisements(device_id)",
        [],
    );
    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_advertisements_mac ON advertisements(mac)",
        [],
    );

    migrate_advertisements_if_needed(conn)?;

    conn.execute_batch(CREATE_GATT_SERVICES_HISTORY)?;
    conn.execute_batch(CREATE_DEVICE_GPS_HISTORY)?;
    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_device_gps_history_mac_time ON device_gps_history(mac, timestamp)",
        [],
    );

    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<HashSet<String>>>()?;
    Ok(cols)
}

/// Rebuild `devices` to drop legacy columns and enforce case-insensitive MAC
/// uniqueness, keeping only the greatest-id row per uppercase MAC.
fn migrate_devices_if_needed(conn: &mut Connection) -> rusqlite::Result<()> {
    let cols = table_columns(conn, "devices")?;
    if !cols.contains("advertisement_raw") && !cols.contains("device_info") {
        return Ok(());
    }

    conn.pragma_update(None, "foreign_keys", false)?;
    let tx = conn.transaction()?;

    tx.execute_batch(
        "
CREATE TABLE IF NOT EXISTS devices_new (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER,
    device_type TEXT,
    name TEXT,
    mac TEXT UNIQUE COLLATE NOCASE,
    mac_type TEXT,
    mac_subtype TEXT,
    rssi INTEGER,
    service TEXT,
    timestamp TEXT,
    adapter TEXT,
    manufacturer_data TEXT,
    manufacturer_name TEXT,
    service_uuids TEXT,
    service_data TEXT,
    tx_power TEXT,
    platform_data TEXT,
    advertisement_json TEXT,
    last_adv_id INTEGER,
    gps TEXT,
    detection_count INTEGER DEFAULT 1,
    last_count_update TEXT,
    tag TEXT,
    type TEXT
);
",
    )?;

    // Copy the latest row per MAC (case-insensitive), normalizing the MAC
    // to upper case.
    tx.execute_batch(
        "
INSERT INTO devices_new (
    id,
    session_id, device_type, name, mac, mac_type, mac_subtype, rssi, service, timestamp, adapter,
    manufacturer_data, manufacturer_name, service_uuids, service_data, tx_power, platform_data,
    advertisement_json, last_adv_id, gps, detection_count, last_count_update, tag, type
)
SELECT
    d.id,
    d.session_id,
    d.device_type,
    d.name,
    UPPER(d.mac) AS mac,
    d.mac_type,
    d.mac_subtype,
    d.rssi,
    d.service,
    d.timestamp,
    d.adapter,
    d.manufacturer_data,
    d.manufacturer_name,
    d.service_uuids,
    d.service_data,
    d.tx_power,
    d.platform_data,
    d.advertisement_json,
    d.last_adv_id,
    d.gps,
    COALESCE(d.detection_count, 1) AS detection_count,
    d.last_count_update,
    d.tag,
    NULL AS type
FROM devices d
JOIN (
    SELECT UPPER(mac) AS umac, MAX(id) AS maxid
    FROM devices
    WHERE mac IS NOT NULL AND TRIM(mac) != ''
    GROUP BY UPPER(mac)
) m
ON UPPER(d.mac) = m.umac AND d.id = m.maxid;

DROP TABLE devices;
ALTER TABLE devices_new RENAME TO devices;
",
    )?;

    tx.commit()?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}

/// Add the `device_id` foreign key to `advertisements` when absent,
/// resolving it by MAC and preserving row ids so `devices.last_adv_id`
/// stays valid.
fn migrate_advertisements_if_needed(conn: &mut Connection) -> rusqlite::Result<()> {
    let cols = table_columns(conn, "advertisements")?;
    if cols.contains("device_id") {
        return Ok(());
    }

    conn.pragma_update(None, "foreign_keys", false)?;
    let tx = conn.transaction()?;

    tx.execute_batch(
        "
CREATE TABLE IF NOT EXISTS advertisements_new (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER,
    device_id INTEGER,
    mac TEXT,
    timestamp TEXT,
    rssi INTEGER,
    adv_raw TEXT,
    adv_json TEXT,
    FOREIGN KEY(device_id) REFERENCES devices(id) ON DELETE CASCADE
);

INSERT INTO advertisements_new (id, session_id, device_id, mac, timestamp, rssi, adv_raw, adv_json)
SELECT
    a.id,
    a.session_id,
    d.id AS device_id,
    UPPER(a.mac) AS mac,
    a.timestamp,
    a.rssi,
    a.adv_raw,
    a.adv_json
FROM advertisements a
LEFT JOIN devices d ON UPPER(d.mac) = UPPER(a.mac);

DROP TABLE advertisements;
ALTER TABLE advertisements_new RENAME TO advertisements;

CREATE INDEX IF NOT EXISTS idx_advertisements_device_id ON advertisements(device_id);
CREATE INDEX IF NOT EXISTS idx_advertisements_mac ON advertisements(mac);
",
    )?;

    tx.commit()?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}
