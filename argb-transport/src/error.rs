//! Transport error types

use thiserror::Error;

/// Errors that can occur during transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Communication timeout")]
    Timeout,

    #[error("HID error: {0}")]
    Hid(String),

    #[error("Invalid command: 0x{0:02X}")]
    InvalidCommand(u8),

    #[error("Device disconnected")]
    Disconnected,
}

impl From<hidapi::HidError> for TransportError {
    fn from(e: hidapi::HidError) -> Self {
        let msg = e.to_string();
        if msg.contains("Permission denied") || msg.contains("EPERM") || msg.contains("EACCES") {
            TransportError::OpenFailed(msg)
        } else {
            TransportError::Hid(msg)
        }
    }
}
