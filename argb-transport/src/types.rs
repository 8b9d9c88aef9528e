//! Common types for transport layer

use std::fmt;

use serde::Serialize;

/// Device identification information
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// USB Vendor ID
    pub vid: u16,
    /// USB Product ID
    pub pid: u16,
    /// Platform device path
    pub path: String,
    /// Serial number if available
    pub serial: Option<String>,
    /// Product name if available
    pub product_name: Option<String>,
}

impl DeviceInfo {
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection lifecycle of a [`crate::DeviceLink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// One inbound buffer, exactly as read from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    data: Vec<u8>,
}

impl RawEvent {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn contains_pong(&self) -> bool {
        crate::protocol::contains_pong(&self.data)
    }
}

/// Events published by a link to its subscribers
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The link moved to a new lifecycle state
    StateChanged(LinkState),
    /// A non-empty buffer arrived from the device
    Inbound(RawEvent),
}
