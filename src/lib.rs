//! # bluescout Core Library
//!
//! A continuous, multi-adapter Bluetooth survey and enrichment daemon for
//! Linux, built on the BlueZ D-Bus stack:
//!
//! - LE advertisement and Classic (BR/EDR) observation
//! - Optional GATT connections reading services/characteristics/descriptors
//! - GPS correlation (gpsd or NMEA serial) on every observation
//! - Single-writer SQLite persistence for offline analysis
//!
//! ## Features
//!
//! - Continuous discovery (no start/stop cycling), per-MAC write throttling
//! - Bounded GATT connect worker pool with cooldowns and in-flight tracking
//! - Hot-plug aware adapter supervision with rebind by controller address
//! - Vendor/UUID reference catalog with a custom overlay
//! - Device-type tagging patterns (iBeacon, manufacturer length, base64 name)
//!
//! ## Example
//!
//! ```rust,no_run
//! use bluescout::core::store::Store;
//! use bluescout::core::catalog::{Catalog, CatalogPaths};
//!
//! fn main() -> anyhow::Result<()> {
//!     let store = Store::open("bluetooth_devices.db")?;
//!     let catalog = Catalog::load(&CatalogPaths::new("./data", None))?;
//!     println!("{:?}", store.get_statistics()?);
//!     drop(catalog);
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;
pub mod utils;

// Re-exports for convenience
pub use crate::cli::{Cli, ExitCodes};
pub use crate::config::ScanSettings;
pub use crate::core::catalog::{Catalog, CatalogPaths};
pub use crate::core::gps::{GpsConfig, GpsMode, GpsState};
pub use crate::core::store::Store;
