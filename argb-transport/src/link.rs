//! Device link: connection lifecycle, liveness and command dispatch
//!
//! ```text
//!  connect()                 close() / read error
//! Disconnected → Connecting → Connected → Disconnected
//! ```
//!
//! Outbound reports go through the writer half under a short lock; inbound
//! reports are pulled by a dedicated reader thread (see [`crate::reader`]).
//! The two directions never wait on each other.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::backend::{HidBackend, ReportWriter};
use crate::error::TransportError;
use crate::frame_log::{FrameLog, TracingFrameLog};
use crate::protocol::{self, timing, CommandCode, REPORT_SIZE};
use crate::reader::{InboundSink, ReaderConfig, ReaderHandle};
use crate::types::{DeviceInfo, LinkEvent, LinkState};

/// Broadcast channel capacity for link events
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Callback invoked with every inbound buffer
pub type InboundCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Anything commands can be sent through
///
/// The lighting coordinator only ever sees this trait, never the transport.
pub trait CommandSink: Send + Sync {
    /// Whether sends currently reach a device
    fn is_connected(&self) -> bool;

    /// Fire-and-forget send of one command
    fn send(&self, cmd: CommandCode, payload: &[u8]);
}

/// Retry policy for [`DeviceLink::verify`]
#[derive(Debug, Clone, Copy)]
pub struct PingPolicy {
    pub attempts: usize,
    pub timeout: Duration,
    pub backoff: Duration,
}

impl Default for PingPolicy {
    fn default() -> Self {
        Self {
            attempts: timing::PING_ATTEMPTS,
            timeout: Duration::from_millis(timing::PING_TIMEOUT_MS),
            backoff: Duration::from_millis(timing::PING_BACKOFF_MS),
        }
    }
}

/// State shared between the link and its reader thread
struct LinkShared {
    state: Mutex<LinkState>,
    writer: Mutex<Option<Box<dyn ReportWriter>>>,
    callback: Mutex<Option<InboundCallback>>,
    /// One-shot PONG filter; installing a new one replaces the old one
    pong_filter: Mutex<Option<oneshot::Sender<()>>>,
    events: broadcast::Sender<LinkEvent>,
    frame_log: Arc<dyn FrameLog>,
}

impl LinkShared {
    fn state(&self) -> LinkState {
        *self.state.lock()
    }

    fn set_state(&self, new: LinkState) {
        let changed = {
            let mut state = self.state.lock();
            let changed = *state != new;
            *state = new;
            changed
        };
        if changed {
            debug!("link state -> {}", new);
            let _ = self.events.send(LinkEvent::StateChanged(new));
        }
    }

    fn log_with<F>(&self, what: &str, f: F)
    where
        F: FnOnce(&dyn FrameLog) -> std::io::Result<()>,
    {
        if let Err(e) = f(self.frame_log.as_ref()) {
            debug!("frame log failed to record {}: {}", what, e);
        }
    }

    /// Move `from` to `to` only if nothing else changed the state meanwhile
    fn advance(&self, from: LinkState, to: LinkState) -> bool {
        {
            let mut state = self.state.lock();
            if *state != from {
                return false;
            }
            *state = to;
        }
        debug!("link state -> {}", to);
        let _ = self.events.send(LinkEvent::StateChanged(to));
        true
    }
}

impl InboundSink for LinkShared {
    fn on_inbound(&self, data: &[u8]) {
        self.log_with("inbound frame", |log| log.frame_received(data));

        let event = protocol::decode(data);
        if event.contains_pong() {
            if let Some(tx) = self.pong_filter.lock().take() {
                let _ = tx.send(());
            }
        }

        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(event.data());
        }

        // Ignored when nobody subscribed
        let _ = self.events.send(LinkEvent::Inbound(event));
    }

    fn on_read_error(&self, err: &TransportError) {
        warn!("read loop ended: {}; releasing device", err);
        let released = self.writer.lock().take().is_some();
        self.pong_filter.lock().take();
        if released {
            self.log_with("session end", |log| log.session_ended());
        }
        self.set_state(LinkState::Disconnected);
    }
}

/// Connection to one ARGB controller
pub struct DeviceLink {
    backend: Arc<dyn HidBackend>,
    shared: Arc<LinkShared>,
    reader: Mutex<Option<ReaderHandle>>,
    device: Mutex<Option<DeviceInfo>>,
    /// Enumeration snapshot consulted by `discover`
    snapshot: Mutex<Vec<DeviceInfo>>,
    report_size: Mutex<usize>,
    /// Serializes pings: at most one PONG filter is ever in flight
    ping_lock: tokio::sync::Mutex<()>,
}

impl DeviceLink {
    /// Create a link that logs frames through `tracing`
    pub fn new(backend: Arc<dyn HidBackend>) -> Self {
        Self::with_frame_log(backend, Arc::new(TracingFrameLog))
    }

    /// Create a link with a custom frame log hook
    pub fn with_frame_log(backend: Arc<dyn HidBackend>, frame_log: Arc<dyn FrameLog>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            shared: Arc::new(LinkShared {
                state: Mutex::new(LinkState::Disconnected),
                writer: Mutex::new(None),
                callback: Mutex::new(None),
                pong_filter: Mutex::new(None),
                events,
                frame_log,
            }),
            reader: Mutex::new(None),
            device: Mutex::new(None),
            snapshot: Mutex::new(Vec::new()),
            report_size: Mutex::new(REPORT_SIZE),
            ping_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state() == LinkState::Connected
    }

    /// Device of the current (or last) session
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.device.lock().clone()
    }

    /// Subscribe to state changes and inbound buffers
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.shared.events.subscribe()
    }

    /// Refresh the enumeration snapshot for `vid`/`pid`
    ///
    /// Returns the number of matching devices.
    pub fn rescan(&self, vid: u16, pid: u16) -> Result<usize, TransportError> {
        let devices = self.backend.enumerate(vid, pid)?;
        let count = devices.len();
        *self.snapshot.lock() = devices;
        Ok(count)
    }

    /// Devices found by the last `rescan`/`connect`
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.snapshot.lock().clone()
    }

    /// Whether a matching device is in the current enumeration snapshot.
    ///
    /// Pure query; call [`rescan`](Self::rescan) to refresh the snapshot.
    pub fn discover(&self, vid: u16, pid: u16) -> bool {
        self.snapshot.lock().iter().any(|d| d.matches(vid, pid))
    }

    /// Open the first device matching `vid`/`pid` and start the read loop
    pub fn connect(&self, vid: u16, pid: u16) -> Result<(), TransportError> {
        // At most one open handle per link
        self.close();
        self.shared.set_state(LinkState::Connecting);

        match self.open_first(vid, pid) {
            Ok(info) => {
                info!(
                    "Connected to VID={:04X} PID={:04X} path={}",
                    info.vid, info.pid, info.path
                );
                Ok(())
            }
            Err(e) => {
                warn!("Connect VID={:04X} PID={:04X} failed: {}", vid, pid, e);
                self.shared.set_state(LinkState::Disconnected);
                Err(e)
            }
        }
    }

    fn open_first(&self, vid: u16, pid: u16) -> Result<DeviceInfo, TransportError> {
        self.rescan(vid, pid)?;
        let target = self
            .snapshot
            .lock()
            .first()
            .cloned()
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        let opened = self.backend.open(&target).map_err(|e| match e {
            TransportError::OpenFailed(msg) => TransportError::OpenFailed(msg),
            other => TransportError::OpenFailed(other.to_string()),
        })?;

        *self.report_size.lock() = opened.report_size.max(REPORT_SIZE);
        *self.shared.writer.lock() = Some(opened.writer);
        *self.device.lock() = Some(opened.info.clone());
        self.shared
            .log_with("session start", |log| log.session_started(&opened.info));

        let config = ReaderConfig {
            buffer_len: opened.report_size,
            ..ReaderConfig::default()
        };
        let handle = match ReaderHandle::spawn(opened.reader, Arc::clone(&self.shared), config) {
            Ok(handle) => handle,
            Err(e) => {
                if self.shared.writer.lock().take().is_some() {
                    self.shared.log_with("session end", |log| log.session_ended());
                }
                return Err(e);
            }
        };

        // The read loop may already have failed and released the device
        if !self.shared.advance(LinkState::Connecting, LinkState::Connected) {
            handle.stop();
            return Err(TransportError::Disconnected);
        }
        *self.reader.lock() = Some(handle);
        Ok(opened.info)
    }

    /// Install the callback that receives every inbound buffer.
    ///
    /// The read loop itself starts with `connect`; this only changes where
    /// inbound data goes. `None` removes the callback.
    pub fn start_reading(&self, callback: Option<InboundCallback>) {
        *self.shared.callback.lock() = callback;
    }

    /// Fire-and-forget send of one framed report.
    ///
    /// Write failures are logged and swallowed: ordinary commands have no
    /// acknowledgment, so a caller cannot know whether the device got them.
    pub fn send(&self, cmd: CommandCode, payload: &[u8]) {
        let report = protocol::encode(cmd, payload, *self.report_size.lock());

        let mut writer = self.shared.writer.lock();
        let Some(writer) = writer.as_mut() else {
            debug!("dropping {}: link not connected", cmd);
            return;
        };

        self.shared
            .log_with("outbound frame", |log| log.frame_sent(cmd, report.as_bytes()));
        if let Err(e) = writer.write_report(report.as_bytes()) {
            warn!("write of {} failed: {}", cmd, e);
        }
    }

    /// Send a command given as a raw byte, rejecting codes outside the command set
    pub fn send_raw(&self, code: u8, payload: &[u8]) -> Result<(), TransportError> {
        let cmd = CommandCode::try_from(code)?;
        self.send(cmd, payload);
        Ok(())
    }

    /// Send PING and wait for a buffer containing "PONG" anywhere in it.
    ///
    /// A concurrent call waits for the in-flight ping to resolve first.
    pub async fn try_ping(&self, timeout: Duration) -> Result<(), TransportError> {
        let _guard = self.ping_lock.lock().await;
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }

        let (tx, rx) = oneshot::channel();
        // Installed before sending so an immediate reply is not missed
        *self.shared.pong_filter.lock() = Some(tx);
        self.send(CommandCode::Ping, &[]);

        let result = tokio::time::timeout(timeout, rx).await;
        self.shared.pong_filter.lock().take();

        match result {
            Ok(Ok(())) => Ok(()),
            // Sender dropped: the read loop died or the link closed
            Ok(Err(_)) => Err(TransportError::Disconnected),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// `true` if PONG arrived within `timeout`
    pub async fn ping(&self, timeout: Duration) -> bool {
        self.try_ping(timeout).await.is_ok()
    }

    /// Ping with retries; `false` means the firmware is unresponsive
    pub async fn verify(&self, policy: PingPolicy) -> bool {
        for attempt in 1..=policy.attempts {
            match self.try_ping(policy.timeout).await {
                Ok(()) => {
                    info!("PONG received (attempt {}/{})", attempt, policy.attempts);
                    return true;
                }
                Err(TransportError::Disconnected) => return false,
                Err(e) => {
                    warn!("PING attempt {}/{}: {}", attempt, policy.attempts, e);
                    if attempt < policy.attempts {
                        tokio::time::sleep(policy.backoff).await;
                    }
                }
            }
        }
        false
    }

    /// Stop the read loop and release the device. Safe to call repeatedly.
    pub fn close(&self) {
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            reader.stop();
        }

        let released = self.shared.writer.lock().take().is_some();
        self.shared.pong_filter.lock().take();
        self.snapshot.lock().clear();

        if released {
            self.shared.log_with("session end", |log| log.session_ended());
            info!("Device link closed");
        }
        self.shared.set_state(LinkState::Disconnected);
    }
}

impl CommandSink for DeviceLink {
    fn is_connected(&self) -> bool {
        DeviceLink::is_connected(self)
    }

    fn send(&self, cmd: CommandCode, payload: &[u8]) {
        DeviceLink::send(self, cmd, payload);
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        self.close();
    }
}
