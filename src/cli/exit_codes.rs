//! CLI Exit Codes
//!
//! Standard exit codes for automation around the daemon.

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Graceful shutdown
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Database open or migration failed
    pub const STORE_ERROR: u8 = 2;

    /// Reference data failed to load
    pub const DATA_ERROR: u8 = 3;

    /// GPS reader failed to start
    pub const GPS_ERROR: u8 = 4;

    /// No Bluetooth adapters found or selected
    pub const NO_ADAPTERS: u8 = 5;
}

/// Human-readable description for an exit code.
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        ExitCodes::SUCCESS => "Graceful shutdown",
        ExitCodes::ERROR => "General error",
        ExitCodes::STORE_ERROR => "Database open or migration failed",
        ExitCodes::DATA_ERROR => "Reference data failed to load",
        ExitCodes::GPS_ERROR => "GPS reader failed to start",
        ExitCodes::NO_ADAPTERS => "No Bluetooth adapters found or selected",
        _ => "Unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptions() {
        assert_eq!(exit_code_description(0), "Graceful shutdown");
        assert_eq!(exit_code_description(99), "Unknown error");
    }
}
