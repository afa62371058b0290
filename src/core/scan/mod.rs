//! Continuous scan/connect pipeline
//!
//! One [`supervisor`] task per configured adapter keeps a [`discovery`]
//! loop alive across hot-plug events. The discovery loop snapshots the
//! stack's device tree every few seconds, throttles persistence per MAC
//! ([`tracker`]), and schedules GATT connect jobs consumed by the
//! [`connect`] worker pool, which walks and stores the remote GATT database
//! ([`gatt`]).

pub mod adapters;
pub mod blacklist;
pub mod connect;
pub mod discovery;
pub mod gatt;
pub mod markers;
pub mod observation;
pub mod preflight;
pub mod supervisor;
pub mod tracker;

use thiserror::Error;

/// Errors raised inside the scan/connect pipeline.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Bluetooth(#[from] bluer::Error),

    #[error("no adapters")]
    NoAdapters,

    #[error("no GATT services")]
    NoGattServices,

    #[error("services not resolved")]
    ServicesNotResolved,

    #[error("empty mac")]
    EmptyMac,

    #[error("invalid mac: {0}")]
    InvalidMac(String),

    #[error("connect job deadline exceeded")]
    JobDeadline,
}

impl ScanError {
    /// Transient stack errors that would flood the log: the device object
    /// vanished or became unreachable mid-connect.
    pub fn is_benign(&self) -> bool {
        let text = self.to_string();
        text.contains("UnknownObject")
            || text.contains("NotAvailable")
            || text.contains("le-connection-abort-by-local")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_error_patterns() {
        assert!(!ScanError::NoGattServices.is_benign());
        assert!(!ScanError::ServicesNotResolved.is_benign());
    }
}
