//! Connectivity polling
//!
//! Once per interval the monitor refreshes device enumeration and classifies
//! the controller as connected (link open), present (enumerated but not
//! open) or disconnected. Only transitions are published.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use argb_transport::protocol::timing;
use argb_transport::{DeviceInfo, DeviceLink};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::led::{LightingMode, RgbColor};

/// Default polling interval
pub const POLL_INTERVAL: Duration = Duration::from_millis(timing::PRESENCE_POLL_MS);

/// What the user sees as the controller's status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// Not enumerated
    Disconnected,
    /// Enumerated, no open link
    Present,
    /// Link open
    Connected,
}

impl ConnectivityState {
    pub fn classify(connected: bool, present: bool) -> Self {
        if connected {
            Self::Connected
        } else if present {
            Self::Present
        } else {
            Self::Disconnected
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "not detected",
            Self::Present => "present",
            Self::Connected => "connected",
        })
    }
}

/// Snapshot printed by `status --json`
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub vid: u16,
    pub pid: u16,
    pub connectivity: ConnectivityState,
    pub devices: Vec<DeviceInfo>,
    pub saved_mode: LightingMode,
    pub saved_color: RgbColor,
}

/// Source of presence information
pub trait PresenceProbe: Send + Sync + 'static {
    /// Refresh enumeration; true if a matching device is attached
    fn rescan(&self, vid: u16, pid: u16) -> bool;

    fn is_connected(&self) -> bool;

    fn connectivity(&self, vid: u16, pid: u16) -> ConnectivityState {
        let present = self.rescan(vid, pid);
        ConnectivityState::classify(self.is_connected(), present)
    }
}

impl PresenceProbe for DeviceLink {
    fn rescan(&self, vid: u16, pid: u16) -> bool {
        match DeviceLink::rescan(self, vid, pid) {
            Ok(count) => count > 0,
            Err(e) => {
                warn!("Device enumeration failed: {}", e);
                false
            }
        }
    }

    fn is_connected(&self) -> bool {
        DeviceLink::is_connected(self)
    }
}

/// Background poller publishing [`ConnectivityState`] transitions
pub struct PresenceMonitor {
    events: broadcast::Sender<ConnectivityState>,
    shutdown: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl PresenceMonitor {
    /// Start polling on the current tokio runtime
    pub fn spawn<P: PresenceProbe>(probe: Arc<P>, vid: u16, pid: u16, interval: Duration) -> Self {
        let (events, _) = broadcast::channel(16);
        let shutdown = Arc::new(AtomicBool::new(false));

        let tx = events.clone();
        let flag = Arc::clone(&shutdown);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut last: Option<ConnectivityState> = None;

            while !flag.load(Ordering::SeqCst) {
                ticker.tick().await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                let state = probe.connectivity(vid, pid);
                if last != Some(state) {
                    debug!("connectivity -> {}", state);
                    last = Some(state);
                    let _ = tx.send(state);
                }
            }
        });

        Self {
            events,
            shutdown,
            task: Some(task),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityState> {
        self.events.subscribe()
    }

    /// Stop polling. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PresenceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct FakeProbe {
        present: AtomicBool,
        connected: AtomicBool,
        scans: AtomicUsize,
    }

    impl PresenceProbe for FakeProbe {
        fn rescan(&self, _vid: u16, _pid: u16) -> bool {
            self.scans.fetch_add(1, Ordering::SeqCst);
            self.present.load(Ordering::SeqCst)
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_classify() {
        use ConnectivityState::*;
        assert_eq!(ConnectivityState::classify(true, true), Connected);
        assert_eq!(ConnectivityState::classify(true, false), Connected);
        assert_eq!(ConnectivityState::classify(false, true), Present);
        assert_eq!(ConnectivityState::classify(false, false), Disconnected);
    }

    #[tokio::test]
    async fn test_publishes_only_transitions() {
        let probe = Arc::new(FakeProbe::default());
        let mut monitor =
            PresenceMonitor::spawn(Arc::clone(&probe), 0x20A0, 0x423D, Duration::from_millis(10));
        let mut rx = monitor.subscribe();

        tokio::time::sleep(Duration::from_millis(35)).await;
        probe.present.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(35)).await;
        probe.connected.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(35)).await;
        monitor.stop();

        let mut seen = Vec::new();
        while let Ok(state) = rx.try_recv() {
            seen.push(state);
        }
        // The first tick may land before subscribe()
        if seen.first() == Some(&ConnectivityState::Disconnected) {
            seen.remove(0);
        }
        assert_eq!(
            seen,
            vec![ConnectivityState::Present, ConnectivityState::Connected]
        );
        assert!(probe.scans.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn test_status_report_json() {
        let report = StatusReport {
            vid: 0x20A0,
            pid: 0x423D,
            connectivity: ConnectivityState::Present,
            devices: vec![DeviceInfo {
                vid: 0x20A0,
                pid: 0x423D,
                path: "/dev/hidraw4".into(),
                serial: None,
                product_name: Some("Pico ARGB Controller".into()),
            }],
            saved_mode: LightingMode::Music,
            saved_color: RgbColor::CYAN,
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["vid"], 0x20A0);
        assert_eq!(json["connectivity"], "present");
        assert_eq!(json["devices"][0]["path"], "/dev/hidraw4");
        assert!(json["devices"][0]["serial"].is_null());
        assert_eq!(json["saved_mode"], 5);
        assert_eq!(json["saved_color"], "#00FFFF");
    }

    #[tokio::test]
    async fn test_stop_halts_polling() {
        let probe = Arc::new(FakeProbe::default());
        let mut monitor =
            PresenceMonitor::spawn(Arc::clone(&probe), 0x20A0, 0x423D, Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        monitor.stop();
        monitor.stop();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let scans = probe.scans.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(probe.scans.load(Ordering::SeqCst), scans);
    }
}
