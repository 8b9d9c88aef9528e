//! Transport layer for RP2040 ARGB fan controller communication
//!
//! - [`protocol`]: report framing and the closed command set
//! - [`DeviceLink`]: discovery, connection lifecycle, PING/PONG liveness,
//!   fire-and-forget sends and the inbound read loop
//! - [`HidBackend`]: the seam between the link and hidapi
//! - [`FrameLog`]: observer hook for every sent and received frame

pub mod backend;
pub mod error;
pub mod frame_log;
pub mod link;
pub mod protocol;
pub mod types;

mod reader;

pub use backend::{HidApiBackend, HidBackend, OpenedDevice, ReportReader, ReportWriter};
pub use error::TransportError;
pub use frame_log::{ascii_preview, hex_dump, FileFrameLog, FrameLog, TracingFrameLog};
pub use link::{CommandSink, DeviceLink, InboundCallback, PingPolicy};
pub use protocol::{contains_pong, decode, encode, CommandCode, Report};
pub use types::{DeviceInfo, LinkEvent, LinkState, RawEvent};
