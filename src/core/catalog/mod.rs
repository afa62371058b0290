//! Reference catalog: vendor OUIs and Bluetooth SIG UUID names
//!
//! Loaded once at startup from a `default/` directory with an optional
//! same-shaped `custom/` overlay:
//!
//! ```text
//! data/default/oui.csv
//! data/default/service_uuids.yaml
//! data/default/characteristic_uuids.yaml
//! data/custom/...               (overrides, all optional)
//! ```
//!
//! Missing files are not an error; missing both directories yields an empty
//! catalog. The catalog is immutable after load.

mod oui;
mod uuids;

pub use uuids::canonicalize_uuid;

use crate::core::mac;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Catalog load errors. File-level problems are tolerated at load; this
/// surfaces only explicit misconfiguration.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The user-provided custom data directory does not exist.
    #[error("custom data directory not accessible: {}", .0.display())]
    CustomDirMissing(PathBuf),

    /// A UUID string could not be canonicalized.
    #[error("bad uuid: {0}")]
    BadUuid(String),
}

/// Where the catalog files live.
#[derive(Debug, Clone)]
pub struct CatalogPaths {
    /// Root containing `default/` and `custom/` subdirectories.
    pub data_dir: PathBuf,
    /// Optional explicit overlay directory (defaults to `<data_dir>/custom`).
    pub custom_dir: Option<PathBuf>,
}

impl CatalogPaths {
    pub fn new(data_dir: impl Into<PathBuf>, custom_dir: Option<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            custom_dir,
        }
    }

    fn default_dir(&self) -> PathBuf {
        self.data_dir.join("default")
    }

    fn custom_dir(&self) -> PathBuf {
        self.custom_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("custom"))
    }
}

/// Immutable lookup tables for vendor and UUID names.
///
/// All UUID keys are stored in canonical 128-bit lower-case form.
#[derive(Debug, Default)]
pub struct Catalog {
    vendors: HashMap<String, String>,
    service_names: HashMap<String, String>,
    characteristic_names: HashMap<String, String>,
}

impl Catalog {
    /// Load the catalog, overlaying `custom/` entries over `default/` ones.
    ///
    /// Individual files load best-effort; an explicitly configured custom
    /// directory that does not exist is reported as an error.
    pub fn load(paths: &CatalogPaths) -> Result<Self, CatalogError> {
        let default_dir = paths.default_dir();
        let custom_dir = paths.custom_dir();

        let mut catalog = Self::default();
        catalog.load_dir(&default_dir);
        catalog.load_dir(&custom_dir);

        if let Some(explicit) = &paths.custom_dir {
            if !explicit.is_dir() {
                return Err(CatalogError::CustomDirMissing(explicit.clone()));
            }
        }

        Ok(catalog)
    }

    fn load_dir(&mut self, dir: &Path) {
        if let Ok(items) = oui::load_oui(&dir.join("oui.csv")) {
            self.vendors.extend(items);
        }
        if let Ok(items) = uuids::load_uuid_yaml(&dir.join("service_uuids.yaml")) {
            self.service_names.extend(items);
        }
        if let Ok(items) = uuids::load_uuid_yaml(&dir.join("characteristic_uuids.yaml")) {
            self.characteristic_names.extend(items);
        }
    }

    /// True when no table loaded anything.
    pub fn is_empty(&self) -> bool {
        self.vendors.is_empty()
            && self.service_names.is_empty()
            && self.characteristic_names.is_empty()
    }

    /// Vendor (MA-L organization) for a MAC address, resolved by OUI.
    /// Empty for random/private addresses not in the registry.
    pub fn vendor_for_mac(&self, mac: &str) -> Option<&str> {
        let oui = mac::oui_prefix(mac)?;
        self.vendors.get(&oui).map(String::as_str)
    }

    /// Service name for a canonical 128-bit lowercase UUID.
    pub fn service_name(&self, uuid: &str) -> Option<&str> {
        self.service_names
            .get(uuid.trim().to_lowercase().as_str())
            .map(String::as_str)
    }

    /// Characteristic name for a canonical 128-bit lowercase UUID.
    pub fn characteristic_name(&self, uuid: &str) -> Option<&str> {
        self.characteristic_names
            .get(uuid.trim().to_lowercase().as_str())
            .map(String::as_str)
    }

    /// `uuid` or `uuid (Name)` when the service name is known.
    pub fn annotate_service_uuid(&self, uuid: &str) -> String {
        match self.service_name(uuid) {
            Some(name) => format!("{uuid} ({name})"),
            None => uuid.to_string(),
        }
    }

    /// `uuid` or `uuid (Name)` when the characteristic name is known.
    pub fn annotate_characteristic_uuid(&self, uuid: &str) -> String {
        match self.characteristic_name(uuid) {
            Some(name) => format!("{uuid} ({name})"),
            None => uuid.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with(service: &[(&str, &str)], chars: &[(&str, &str)]) -> Catalog {
        Catalog {
            vendors: HashMap::from([("AABBCC".to_string(), "Acme Corp".to_string())]),
            service_names: service
                .iter()
                .map(|(u, n)| (u.to_string(), n.to_string()))
                .collect(),
            characteristic_names: chars
                .iter()
                .map(|(u, n)| (u.to_string(), n.to_string()))
                .collect(),
        }
    }

    #[test]
    fn vendor_lookup_by_oui() {
        let c = catalog_with(&[], &[]);
        assert_eq!(c.vendor_for_mac("aa:bb:cc:01:02:03"), Some("Acme Corp"));
        assert_eq!(c.vendor_for_mac("11:22:33:01:02:03"), None);
    }

    #[test]
    fn annotate_known_and_unknown() {
        let uuid = "0000180f-0000-1000-8000-00805f9b34fb";
        let c = catalog_with(&[(uuid, "Battery Service")], &[]);
        assert_eq!(
            c.annotate_service_uuid(uuid),
            format!("{uuid} (Battery Service)")
        );
        let unknown = "0000ffff-0000-1000-8000-00805f9b34fb";
        assert_eq!(c.annotate_service_uuid(unknown), unknown);
    }

    #[test]
    fn missing_directories_yield_empty_catalog() {
        let paths = CatalogPaths::new("/nonexistent/bluescout-data", None);
        let c = Catalog::load(&paths).unwrap();
        assert!(c.is_empty());
    }
}
