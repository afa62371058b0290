//! Core module containing the main functionality of bluescout
//!
//! This module provides:
//! - MAC address normalization and classification
//! - Reference catalog (vendor OUIs, Bluetooth SIG UUID names)
//! - GPS fix state with gpsd/serial readers and a stall watchdog
//! - Single-writer SQLite store with schema migrations
//! - Continuous scan/connect pipeline (discovery loops, connect workers,
//!   GATT dumper, hot-plug adapter supervision)
//! - Periodic status ticker

pub mod catalog;
pub mod gps;
pub mod mac;
pub mod scan;
pub mod status;
pub mod store;
