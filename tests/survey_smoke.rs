//! Integration smoke tests for the survey pipeline pieces that run without
//! Bluetooth hardware: store persistence on disk, catalog loading with an
//! overlay, and end-to-end type classification.

use bluescout::core::scan::markers;
use bluescout::core::scan::observation::ManufacturerEntry;
use bluescout::core::store::{SaveParams, Store};
use bluescout::{Catalog, CatalogPaths};

#[test]
fn store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("bluetooth_devices.db");

    {
        let store = Store::open(&db_path).unwrap();
        store
            .save_device(SaveParams {
                mac: "AA:BB:CC:DD:EE:FF".to_string(),
                name: Some("Survey Target".to_string()),
                device_family: Some("ble".to_string()),
                timestamp: Some("2026-01-01 10:00:00".to_string()),
                ..Default::default()
            })
            .unwrap();
        store
            .update_gatt_services(
                "AA:BB:CC:DD:EE:FF",
                "Service: 0000180f-0000-1000-8000-00805f9b34fb (Battery Service)",
            )
            .unwrap();
    }

    // Reopen: schema initialization must be a no-op and data must survive.
    let store = Store::open(&db_path).unwrap();
    assert!(store.device_exists("aa:bb:cc:dd:ee:ff").unwrap());
    assert!(store.has_gatt_services("AA:BB:CC:DD:EE:FF").unwrap());
    let stats = store.get_statistics().unwrap();
    assert_eq!(stats.total_devices, 1);
    assert_eq!(stats.named_devices, 1);
}

#[test]
fn catalog_loads_with_custom_overlay() {
    let dir = tempfile::tempdir().unwrap();
    let default_dir = dir.path().join("default");
    let custom_dir = dir.path().join("custom");
    std::fs::create_dir_all(&default_dir).unwrap();
    std::fs::create_dir_all(&custom_dir).unwrap();

    std::fs::write(
        default_dir.join("oui.csv"),
        "Registry,Assignment,Organization Name\nMA-L,AABBCC,Acme Corp\n",
    )
    .unwrap();
    std::fs::write(
        default_dir.join("service_uuids.yaml"),
        "uuids:\n  - uuid: 0x180F\n    name: Battery Service\n",
    )
    .unwrap();
    std::fs::write(
        custom_dir.join("oui.csv"),
        "Registry,Assignment,Organization Name\nMA-L,AABBCC,Acme Overridden\n",
    )
    .unwrap();

    let catalog = Catalog::load(&CatalogPaths::new(dir.path(), None)).unwrap();
    assert_eq!(
        catalog.vendor_for_mac("AA:BB:CC:00:11:22"),
        Some("Acme Overridden")
    );
    assert_eq!(
        catalog.annotate_service_uuid("0000180f-0000-1000-8000-00805f9b34fb"),
        "0000180f-0000-1000-8000-00805f9b34fb (Battery Service)"
    );
}

#[test]
fn ibeacon_pattern_classifies_from_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let default_dir = dir.path().join("default");
    std::fs::create_dir_all(&default_dir).unwrap();
    std::fs::write(
        default_dir.join("device_types.yaml"),
        "types:\n  - name: cokeon\n    ibeacon:\n      apple_company_id: 76\n      uuid: 8AEFB031-6C32-486F-825B-E26FA193487D\n      major: 42\n      minor: 7\n",
    )
    .unwrap();

    let patterns = markers::load_device_type_patterns(dir.path(), None);
    let mfg = vec![ManufacturerEntry {
        company_id: 76,
        data_hex: "02 15 8a ef b0 31 6c 32 48 6f 82 5b e2 6f a1 93 48 7d 00 2a 00 07 c5"
            .to_string(),
    }];
    assert_eq!(
        markers::detect_typed_device(&patterns, &[], &mfg, "Vending Machine"),
        Some("cokeon".to_string())
    );
}
