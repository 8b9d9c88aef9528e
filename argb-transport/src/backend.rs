//! HID backend seam: enumeration and raw report I/O
//!
//! [`DeviceLink`](crate::DeviceLink) never touches hidapi directly. It talks to
//! a [`HidBackend`], which hands out independent writer and reader halves so
//! that a blocked read never delays a write.

use std::ffi::CString;

use hidapi::{HidApi, HidDevice};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::TransportError;
use crate::protocol::REPORT_SIZE;
use crate::types::DeviceInfo;

/// Outbound half of an open device
pub trait ReportWriter: Send {
    /// Write one complete report (report id included)
    fn write_report(&mut self, report: &[u8]) -> Result<usize, TransportError>;
}

/// Inbound half of an open device
pub trait ReportReader: Send {
    /// Read one input report, waiting at most `timeout_ms`.
    ///
    /// Returns `Ok(0)` on timeout.
    fn read_report(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransportError>;
}

/// An opened device, split into its two directions
pub struct OpenedDevice {
    pub info: DeviceInfo,
    pub writer: Box<dyn ReportWriter>,
    pub reader: Box<dyn ReportReader>,
    /// Outbound report length advertised for this device (>= 64)
    pub report_size: usize,
}

/// Device enumeration and opening
pub trait HidBackend: Send + Sync {
    /// List currently attached devices matching `vid`/`pid`
    fn enumerate(&self, vid: u16, pid: u16) -> Result<Vec<DeviceInfo>, TransportError>;

    /// Open a previously enumerated device
    fn open(&self, device: &DeviceInfo) -> Result<OpenedDevice, TransportError>;
}

/// hidapi-backed implementation
pub struct HidApiBackend {
    api: Mutex<HidApi>,
    report_size: usize,
}

impl HidApiBackend {
    /// Create the backend with the default 64-byte report size
    pub fn new() -> Result<Self, TransportError> {
        Self::with_report_size(REPORT_SIZE)
    }

    /// Create the backend for firmware advertising larger reports
    pub fn with_report_size(report_size: usize) -> Result<Self, TransportError> {
        let api = HidApi::new()?;
        Ok(Self {
            api: Mutex::new(api),
            report_size: report_size.max(REPORT_SIZE),
        })
    }

    fn open_path(api: &HidApi, path: &CString) -> Result<HidDevice, TransportError> {
        api.open_path(path)
            .map_err(|e| TransportError::OpenFailed(e.to_string()))
    }
}

impl HidBackend for HidApiBackend {
    fn enumerate(&self, vid: u16, pid: u16) -> Result<Vec<DeviceInfo>, TransportError> {
        let mut api = self.api.lock();
        api.refresh_devices()?;

        let mut devices: Vec<DeviceInfo> = Vec::new();
        for device_info in api.device_list() {
            if device_info.vendor_id() != vid || device_info.product_id() != pid {
                continue;
            }

            let path = device_info.path().to_string_lossy().to_string();
            // hidapi lists one entry per usage on some platforms
            if devices.iter().any(|d| d.path == path) {
                continue;
            }

            debug!(
                "Found device: VID={:04X} PID={:04X} interface={} path={}",
                vid,
                pid,
                device_info.interface_number(),
                path
            );

            devices.push(DeviceInfo {
                vid,
                pid,
                path,
                serial: device_info.serial_number().map(|s| s.to_string()),
                product_name: device_info.product_string().map(|s| s.to_string()),
            });
        }

        Ok(devices)
    }

    fn open(&self, device: &DeviceInfo) -> Result<OpenedDevice, TransportError> {
        let path = CString::new(device.path.as_bytes())
            .map_err(|e| TransportError::OpenFailed(format!("invalid device path: {e}")))?;

        let api = self.api.lock();
        // Two handles on the same path: reads and writes never contend
        let write_handle = Self::open_path(&api, &path)?;
        let read_handle = Self::open_path(&api, &path)?;

        Ok(OpenedDevice {
            info: device.clone(),
            writer: Box::new(HidWriter(write_handle)),
            reader: Box::new(HidReader(read_handle)),
            report_size: self.report_size,
        })
    }
}

struct HidWriter(HidDevice);

impl ReportWriter for HidWriter {
    fn write_report(&mut self, report: &[u8]) -> Result<usize, TransportError> {
        Ok(self.0.write(report)?)
    }
}

struct HidReader(HidDevice);

impl ReportReader for HidReader {
    fn read_report(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransportError> {
        Ok(self.0.read_timeout(buf, timeout_ms)?)
    }
}
