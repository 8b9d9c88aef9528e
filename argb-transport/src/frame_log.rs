//! Frame log hook for diagnosing link traffic
//!
//! A [`DeviceLink`](crate::DeviceLink) hands every sent report and every
//! received buffer to its [`FrameLog`]. Errors returned by a hook are logged
//! at debug level and otherwise ignored; the link never fails because of one.
//!
//! # Example
//!
//! ```ignore
//! use argb_transport::{DeviceLink, FileFrameLog};
//!
//! let log = FileFrameLog::open("hid_commands.log")?;
//! let link = DeviceLink::with_frame_log(backend, Arc::new(log));
//! ```

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use crate::protocol::{cmd, CommandCode, PAYLOAD_OFFSET};
use crate::types::DeviceInfo;

/// Bytes of a report shown in one-line summaries
const PREVIEW_LEN: usize = 8;

/// Append-only observer of link traffic
pub trait FrameLog: Send + Sync {
    /// A device was opened
    fn session_started(&self, _info: &DeviceInfo) -> io::Result<()> {
        Ok(())
    }

    /// A report was handed to the device (before the write is attempted)
    fn frame_sent(&self, cmd: CommandCode, report: &[u8]) -> io::Result<()>;

    /// A non-empty buffer was read from the device
    fn frame_received(&self, data: &[u8]) -> io::Result<()>;

    /// The device was closed
    fn session_ended(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Format bytes as `00-AA-03` (the controller tool's log style)
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, b) in data.iter().enumerate() {
        if i > 0 {
            out.push('-');
        }
        let _ = write!(out, "{b:02X}");
    }
    out
}

/// Printable ASCII with everything else shown as '.'
pub fn ascii_preview(data: &[u8]) -> String {
    data.iter()
        .map(|&b| if (32..=126).contains(&b) { b as char } else { '.' })
        .collect()
}

/// Payload bytes that carry meaning (trailing zero padding stripped)
fn significant_payload(report: &[u8]) -> &[u8] {
    let payload = report.get(PAYLOAD_OFFSET..).unwrap_or(&[]);
    let end = payload.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &payload[..end]
}

/// Logs frames through `tracing` at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFrameLog;

impl FrameLog for TracingFrameLog {
    fn session_started(&self, info: &DeviceInfo) -> io::Result<()> {
        debug!(
            "session started VID={:04X} PID={:04X} path={}",
            info.vid, info.pid, info.path
        );
        Ok(())
    }

    fn frame_sent(&self, cmd: CommandCode, report: &[u8]) -> io::Result<()> {
        debug!(
            ">>> {} payload=[{}] report={}...",
            cmd,
            hex_dump(significant_payload(report)),
            hex_dump(&report[..report.len().min(PREVIEW_LEN)])
        );
        Ok(())
    }

    fn frame_received(&self, data: &[u8]) -> io::Result<()> {
        debug!("<<< {} \"{}\"", hex_dump(data), ascii_preview(data));
        Ok(())
    }
}

/// Appends human-readable frame records to a file
///
/// Each record is timestamped with seconds since the log was opened.
pub struct FileFrameLog {
    path: PathBuf,
    file: Mutex<File>,
    start: Instant,
}

impl FileFrameLog {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            start: Instant::now(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, lines: &[String]) -> io::Result<()> {
        let mut file = self.file.lock();
        for line in lines {
            writeln!(file, "{line}")?;
        }
        file.flush()
    }

    fn stamp(&self) -> String {
        format!("[{:>10.3}s]", self.start.elapsed().as_secs_f64())
    }
}

impl FrameLog for FileFrameLog {
    fn session_started(&self, info: &DeviceInfo) -> io::Result<()> {
        self.append(&[
            format!("=== SESSION START {} ===", self.stamp()),
            format!("Connecting to VID: 0x{:04X}, PID: 0x{:04X}", info.vid, info.pid),
        ])
    }

    fn frame_sent(&self, command: CommandCode, report: &[u8]) -> io::Result<()> {
        let payload = significant_payload(report);
        let payload = if payload.is_empty() {
            "NULL".to_string()
        } else {
            hex_dump(payload)
        };
        self.append(&[
            format!(
                "{} >> SENT: Cmd=0x{:02X} ({})",
                self.stamp(),
                command.as_u8(),
                cmd::name(command.as_u8())
            ),
            format!("               Payload: {payload}"),
            format!(
                "               Report: {}...",
                hex_dump(&report[..report.len().min(PREVIEW_LEN)])
            ),
        ])
    }

    fn frame_received(&self, data: &[u8]) -> io::Result<()> {
        self.append(&[
            format!("{} << RECEIVED: {}", self.stamp(), hex_dump(data)),
            format!("               ASCII: {}", ascii_preview(data)),
        ])
    }

    fn session_ended(&self) -> io::Result<()> {
        self.append(&[format!("=== SESSION END {} ===\n", self.stamp())])
    }
}
