//! Protocol constants and report framing for the RP2040 ARGB controller

use std::fmt;

use crate::error::TransportError;
use crate::types::RawEvent;

/// Minimum HID report size (bytes, including the report id)
pub const REPORT_SIZE: usize = 64;

/// Report id used for every outbound report
pub const REPORT_ID: u8 = 0;

/// Offset of the command byte within a report
pub const CMD_OFFSET: usize = 1;

/// Offset of the first payload byte within a report
pub const PAYLOAD_OFFSET: usize = 2;

/// Liveness reply the firmware sends after a PING
pub const PONG: &[u8; 4] = b"PONG";

/// Highest value accepted by MUSIC_LEVEL
pub const MUSIC_LEVEL_MAX: u8 = 100;

/// Raw command bytes understood by the controller firmware
pub mod cmd {
    pub const SET_COLOR: u8 = 0x03;
    pub const OFF: u8 = 0x04;
    pub const SET_MODE: u8 = 0x05;
    pub const MUSIC_LEVEL: u8 = 0x06;
    pub const PING: u8 = 0xAA;

    /// Get human-readable name for command byte
    pub fn name(cmd: u8) -> &'static str {
        match cmd {
            SET_COLOR => "SET_COLOR",
            OFF => "OFF",
            SET_MODE => "SET_MODE",
            MUSIC_LEVEL => "MUSIC_LEVEL",
            PING => "PING",
            _ => "UNKNOWN",
        }
    }
}

/// Liveness and polling timing
pub mod timing {
    /// How long a single PING waits for PONG (ms)
    pub const PING_TIMEOUT_MS: u64 = 500;
    /// PING attempts before the link is declared unresponsive
    pub const PING_ATTEMPTS: usize = 3;
    /// Pause between PING attempts (ms)
    pub const PING_BACKOFF_MS: u64 = 100;
    /// Read timeout of the inbound loop; bounds how long cancellation takes (ms)
    pub const READ_TIMEOUT_MS: i32 = 5;
    /// Presence polling interval (ms)
    pub const PRESENCE_POLL_MS: u64 = 1000;
}

/// Closed set of commands the link is allowed to send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    /// Liveness probe, answered with "PONG"
    Ping = cmd::PING,
    /// Payload `[r, g, b]`
    SetColor = cmd::SET_COLOR,
    /// No payload
    Off = cmd::OFF,
    /// Payload `[mode]` with mode in 1..=7
    SetMode = cmd::SET_MODE,
    /// Payload `[level]` with level in 0..=100
    MusicLevel = cmd::MUSIC_LEVEL,
}

impl CommandCode {
    pub const ALL: [CommandCode; 5] = [
        Self::Ping,
        Self::SetColor,
        Self::Off,
        Self::SetMode,
        Self::MusicLevel,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        cmd::name(self.as_u8())
    }
}

impl TryFrom<u8> for CommandCode {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            cmd::PING => Ok(Self::Ping),
            cmd::SET_COLOR => Ok(Self::SetColor),
            cmd::OFF => Ok(Self::Off),
            cmd::SET_MODE => Ok(Self::SetMode),
            cmd::MUSIC_LEVEL => Ok(Self::MusicLevel),
            other => Err(TransportError::InvalidCommand(other)),
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.as_u8())
    }
}

/// A fully framed outbound report
///
/// Format: `[report_id=0] [cmd] [payload...] [zero padding]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report(Vec<u8>);

impl Report {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Command byte at offset 1
    pub fn command(&self) -> u8 {
        self.0[CMD_OFFSET]
    }

    /// Everything after the command byte, padding included
    pub fn payload(&self) -> &[u8] {
        &self.0[PAYLOAD_OFFSET..]
    }
}

/// Frame a command into a report of `max(report_size, REPORT_SIZE)` bytes.
///
/// Payload bytes that do not fit are dropped.
pub fn encode(cmd: CommandCode, payload: &[u8], report_size: usize) -> Report {
    let size = report_size.max(REPORT_SIZE);
    let mut buf = vec![0u8; size];
    buf[0] = REPORT_ID;
    buf[CMD_OFFSET] = cmd.as_u8();
    let len = std::cmp::min(payload.len(), size - PAYLOAD_OFFSET);
    buf[PAYLOAD_OFFSET..PAYLOAD_OFFSET + len].copy_from_slice(&payload[..len]);
    Report(buf)
}

/// Inbound reports carry no framing; bytes are passed through untouched.
pub fn decode(raw: &[u8]) -> RawEvent {
    RawEvent::new(raw.to_vec())
}

/// Scan the whole buffer for the ASCII sequence "PONG".
pub fn contains_pong(buf: &[u8]) -> bool {
    buf.windows(PONG.len()).any(|w| w == PONG)
}

/// Payload builders for the command set
pub mod payload {
    use super::MUSIC_LEVEL_MAX;

    pub fn set_color(r: u8, g: u8, b: u8) -> [u8; 3] {
        [r, g, b]
    }

    pub fn set_mode(mode: u8) -> [u8; 1] {
        [mode]
    }

    /// Level is truncated toward zero and capped at 100; NaN maps to 0.
    pub fn music_level(level: f32) -> [u8; 1] {
        let level = level.max(0.0) as u32;
        [level.min(MUSIC_LEVEL_MAX as u32) as u8]
    }
}
