//! DeviceLink behaviour against an in-memory HID backend.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use argb_transport::protocol::{cmd, PONG};
use argb_transport::{
    CommandCode, CommandSink, DeviceInfo, DeviceLink, FrameLog, HidBackend, LinkEvent, LinkState,
    OpenedDevice, PingPolicy, ReportReader, ReportWriter, TransportError,
};

const VID: u16 = 0x20A0;
const PID: u16 = 0x423D;

type Inbound = Result<Vec<u8>, TransportError>;

/// Simulated controller firmware
#[derive(Default)]
struct MockFirmware {
    written: Mutex<Vec<Vec<u8>>>,
    inbound: Mutex<Option<Sender<Inbound>>>,
    /// Reply sent after each PING, if any
    pong_reply: Mutex<Option<(Duration, Vec<u8>)>>,
    /// PINGs to ignore before replying
    ignore_pings: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MockFirmware {
    fn reply_to_pings(&self, delay: Duration, data: &[u8]) {
        *self.pong_reply.lock().unwrap() = Some((delay, data.to_vec()));
    }

    fn push_inbound(&self, item: Inbound) {
        if let Some(tx) = self.inbound.lock().unwrap().as_ref() {
            tx.send(item).unwrap();
        }
    }

    fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }

    fn pings_written(&self) -> usize {
        self.written()
            .iter()
            .filter(|r| r[1] == cmd::PING)
            .count()
    }
}

struct MockWriter(Arc<MockFirmware>);

impl ReportWriter for MockWriter {
    fn write_report(&mut self, report: &[u8]) -> Result<usize, TransportError> {
        let fw = &self.0;
        if fw.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Hid("broken pipe".into()));
        }
        fw.written.lock().unwrap().push(report.to_vec());

        if report[1] == cmd::PING {
            if fw.ignore_pings.load(Ordering::SeqCst) > 0 {
                fw.ignore_pings.fetch_sub(1, Ordering::SeqCst);
            } else if let Some((delay, data)) = fw.pong_reply.lock().unwrap().clone() {
                let tx = fw.inbound.lock().unwrap().clone();
                if let Some(tx) = tx {
                    thread::spawn(move || {
                        thread::sleep(delay);
                        let _ = tx.send(Ok(data));
                    });
                }
            }
        }
        Ok(report.len())
    }
}

struct MockReader(Receiver<Inbound>);

impl ReportReader for MockReader {
    fn read_report(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransportError> {
        match self.0.recv_timeout(Duration::from_millis(timeout_ms as u64)) {
            Ok(Ok(data)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }
}

struct MockBackend {
    present: AtomicBool,
    deny_open: AtomicBool,
    /// Reader fails on its first read
    dead_reader: AtomicBool,
    opens: AtomicUsize,
    firmware: Arc<MockFirmware>,
}

impl MockBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            present: AtomicBool::new(true),
            deny_open: AtomicBool::new(false),
            dead_reader: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            firmware: Arc::new(MockFirmware::default()),
        })
    }

    fn info() -> DeviceInfo {
        DeviceInfo {
            vid: VID,
            pid: PID,
            path: "/dev/hidraw7".into(),
            serial: Some("E6614103E7".into()),
            product_name: Some("Pico ARGB Controller".into()),
        }
    }
}

impl HidBackend for MockBackend {
    fn enumerate(&self, vid: u16, pid: u16) -> Result<Vec<DeviceInfo>, TransportError> {
        if self.present.load(Ordering::SeqCst) && vid == VID && pid == PID {
            Ok(vec![Self::info()])
        } else {
            Ok(Vec::new())
        }
    }

    fn open(&self, device: &DeviceInfo) -> Result<OpenedDevice, TransportError> {
        if self.deny_open.load(Ordering::SeqCst) {
            return Err(TransportError::OpenFailed("Permission denied".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        if self.dead_reader.load(Ordering::SeqCst) {
            tx.send(Err(TransportError::Hid("device unplugged".into())))
                .unwrap();
        }
        *self.firmware.inbound.lock().unwrap() = Some(tx);
        Ok(OpenedDevice {
            info: device.clone(),
            writer: Box::new(MockWriter(Arc::clone(&self.firmware))),
            reader: Box::new(MockReader(rx)),
            report_size: 64,
        })
    }
}

fn connected_link() -> (Arc<MockBackend>, DeviceLink) {
    let backend = MockBackend::new();
    let link = DeviceLink::new(backend.clone());
    link.connect(VID, PID).expect("mock device should open");
    (backend, link)
}

fn fast_policy() -> PingPolicy {
    PingPolicy {
        attempts: 3,
        timeout: Duration::from_millis(60),
        backoff: Duration::from_millis(10),
    }
}

#[test]
fn connect_reports_not_found() {
    let backend = MockBackend::new();
    backend.present.store(false, Ordering::SeqCst);
    let link = DeviceLink::new(backend);

    let err = link.connect(VID, PID).unwrap_err();
    assert!(matches!(err, TransportError::DeviceNotFound { vid: VID, pid: PID }));
    assert_eq!(link.state(), LinkState::Disconnected);
}

#[test]
fn connect_reports_open_failed() {
    let backend = MockBackend::new();
    backend.deny_open.store(true, Ordering::SeqCst);
    let link = DeviceLink::new(backend);

    let err = link.connect(VID, PID).unwrap_err();
    assert!(matches!(err, TransportError::OpenFailed(_)));
    assert!(!link.is_connected());
}

#[test]
fn connect_publishes_state_transitions() {
    let backend = MockBackend::new();
    let link = DeviceLink::new(backend);
    let mut rx = link.subscribe();

    link.connect(VID, PID).unwrap();

    let mut states = Vec::new();
    while let Ok(LinkEvent::StateChanged(s)) = rx.try_recv() {
        states.push(s);
    }
    assert_eq!(states, vec![LinkState::Connecting, LinkState::Connected]);
    assert_eq!(link.device_info().unwrap().path, "/dev/hidraw7");
}

#[derive(Default)]
struct SessionLog {
    started: AtomicUsize,
    ended: AtomicUsize,
}

impl FrameLog for SessionLog {
    fn session_started(&self, _device: &DeviceInfo) -> std::io::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn frame_sent(&self, _cmd: CommandCode, _report: &[u8]) -> std::io::Result<()> {
        Ok(())
    }
    fn frame_received(&self, _data: &[u8]) -> std::io::Result<()> {
        Ok(())
    }
    fn session_ended(&self) -> std::io::Result<()> {
        self.ended.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn device_lost_during_connect_ends_session_once() {
    let backend = MockBackend::new();
    backend.dead_reader.store(true, Ordering::SeqCst);
    let log = Arc::new(SessionLog::default());
    let link = DeviceLink::with_frame_log(backend.clone(), log.clone());
    let mut rx = link.subscribe();

    // Either connect notices the dead reader, or the read loop drops the
    // session right after Connected; both end Disconnected.
    let _ = link.connect(VID, PID);
    let deadline = Instant::now() + Duration::from_secs(1);
    while link.state() != LinkState::Disconnected && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(link.state(), LinkState::Disconnected);
    assert_eq!(log.started.load(Ordering::SeqCst), 1);
    assert_eq!(log.ended.load(Ordering::SeqCst), 1);

    let mut states = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let LinkEvent::StateChanged(s) = event {
            states.push(s);
        }
    }
    assert_eq!(states.first(), Some(&LinkState::Connecting));
    assert_eq!(states.last(), Some(&LinkState::Disconnected));
    // Never Connected after the device was released
    let released = states
        .iter()
        .position(|s| *s == LinkState::Disconnected)
        .unwrap();
    assert!(!states[released..].contains(&LinkState::Connected));
}

#[test]
fn reconnect_keeps_a_single_handle() {
    let (backend, link) = connected_link();
    link.connect(VID, PID).unwrap();
    assert_eq!(backend.opens.load(Ordering::SeqCst), 2);
    assert!(link.is_connected());
}

#[test]
fn send_writes_framed_report() {
    let (backend, link) = connected_link();
    link.send(CommandCode::SetColor, &[1, 2, 3]);

    let written = backend.firmware.written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].len(), 64);
    assert_eq!(&written[0][..5], &[0x00, 0x03, 1, 2, 3]);
}

#[test]
fn send_while_disconnected_is_noop() {
    let backend = MockBackend::new();
    let link = DeviceLink::new(backend.clone());
    link.send(CommandCode::Off, &[]);
    assert!(backend.firmware.written().is_empty());
}

/// Ordinary commands have no acknowledgment: a failed write is invisible to
/// the caller apart from the log line, and the link stays connected.
#[test]
fn write_failures_are_swallowed() {
    let (backend, link) = connected_link();
    backend.firmware.fail_writes.store(true, Ordering::SeqCst);

    link.send(CommandCode::SetColor, &[255, 0, 0]);

    assert!(backend.firmware.written().is_empty());
    assert!(link.is_connected());
}

#[test]
fn send_raw_rejects_unknown_command() {
    let (backend, link) = connected_link();
    let err = link.send_raw(0x42, &[1]).unwrap_err();
    assert!(matches!(err, TransportError::InvalidCommand(0x42)));
    assert!(backend.firmware.written().is_empty());

    link.send_raw(cmd::OFF, &[]).unwrap();
    assert_eq!(backend.firmware.written()[0][1], cmd::OFF);
}

#[test]
fn failing_frame_log_does_not_block_sends() {
    struct BrokenLog;
    impl FrameLog for BrokenLog {
        fn frame_sent(&self, _cmd: CommandCode, _report: &[u8]) -> std::io::Result<()> {
            Err(std::io::Error::other("disk full"))
        }
        fn frame_received(&self, _data: &[u8]) -> std::io::Result<()> {
            Err(std::io::Error::other("disk full"))
        }
    }

    let backend = MockBackend::new();
    let link = DeviceLink::with_frame_log(backend.clone(), Arc::new(BrokenLog));
    link.connect(VID, PID).unwrap();
    link.send(CommandCode::SetMode, &[5]);

    assert_eq!(backend.firmware.written().len(), 1);
}

#[test]
fn inbound_buffers_reach_callback_and_subscribers() {
    let (backend, link) = connected_link();
    let seen: Arc<Mutex<Vec<Vec<u8>>>> = Arc::default();
    let seen_clone = Arc::clone(&seen);
    link.start_reading(Some(Arc::new(move |data: &[u8]| {
        seen_clone.lock().unwrap().push(data.to_vec());
    })));
    let mut rx = link.subscribe();

    backend.firmware.push_inbound(Ok(b"hello".to_vec()));
    thread::sleep(Duration::from_millis(50));

    assert_eq!(*seen.lock().unwrap(), vec![b"hello".to_vec()]);
    match rx.try_recv() {
        Ok(LinkEvent::Inbound(event)) => assert_eq!(event.data(), b"hello"),
        other => panic!("expected inbound event, got {other:?}"),
    }
}

#[test]
fn read_error_disconnects_link() {
    let (backend, link) = connected_link();
    let mut rx = link.subscribe();

    backend
        .firmware
        .push_inbound(Err(TransportError::Hid("device unplugged".into())));
    thread::sleep(Duration::from_millis(50));

    assert_eq!(link.state(), LinkState::Disconnected);
    assert!(matches!(
        rx.try_recv(),
        Ok(LinkEvent::StateChanged(LinkState::Disconnected))
    ));

    // Handle released: sends go nowhere
    link.send(CommandCode::Off, &[]);
    assert!(backend.firmware.written().is_empty());
}

#[test]
fn close_is_idempotent() {
    let (_backend, link) = connected_link();
    link.close();
    link.close();
    assert_eq!(link.state(), LinkState::Disconnected);
}

#[test]
fn discover_is_false_after_close_until_rescan() {
    let (_backend, link) = connected_link();
    assert!(link.discover(VID, PID));

    link.close();
    assert!(!link.discover(VID, PID));

    // Still plugged in: a fresh connect finds it again
    link.connect(VID, PID).unwrap();
    assert!(link.discover(VID, PID));
    link.close();
    assert_eq!(link.rescan(VID, PID).unwrap(), 1);
    assert!(link.discover(VID, PID));
}

#[test]
fn discover_ignores_other_ids() {
    let backend = MockBackend::new();
    let link = DeviceLink::new(backend);
    assert_eq!(link.rescan(0x1209, 0xA412).unwrap(), 0);
    assert!(!link.discover(0x1209, 0xA412));
    assert!(!link.discover(VID, PID));
}

#[tokio::test(flavor = "multi_thread")]
async fn ping_finds_pong_at_any_offset() {
    let (backend, link) = connected_link();

    let mut reply = vec![0u8; 64];
    reply[57..61].copy_from_slice(PONG);
    backend
        .firmware
        .reply_to_pings(Duration::from_millis(20), &reply);
    assert!(link.ping(Duration::from_millis(500)).await);

    backend
        .firmware
        .reply_to_pings(Duration::from_millis(5), b"\x00\x01xxPONGzz");
    assert!(link.ping(Duration::from_millis(500)).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn ping_times_out_without_reply() {
    let (backend, link) = connected_link();

    let start = Instant::now();
    let result = link.try_ping(Duration::from_millis(500)).await;

    assert!(matches!(result, Err(TransportError::Timeout)));
    assert!(start.elapsed() >= Duration::from_millis(500));
    assert_eq!(backend.firmware.pings_written(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn ping_ignores_replies_without_pong() {
    let (backend, link) = connected_link();
    backend
        .firmware
        .reply_to_pings(Duration::from_millis(5), b"PING PON G");
    assert!(!link.ping(Duration::from_millis(100)).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn ping_on_closed_link_fails_fast() {
    let backend = MockBackend::new();
    let link = DeviceLink::new(backend);
    let start = Instant::now();
    assert!(!link.ping(Duration::from_millis(500)).await);
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[tokio::test(flavor = "multi_thread")]
async fn filter_is_removed_after_timeout() {
    let (backend, link) = connected_link();
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = Arc::clone(&seen);
    link.start_reading(Some(Arc::new(move |_: &[u8]| {
        seen_clone.fetch_add(1, Ordering::SeqCst);
    })));

    assert!(!link.ping(Duration::from_millis(50)).await);

    // A late PONG is ordinary inbound data now
    backend.firmware.push_inbound(Ok(PONG.to_vec()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn verify_retries_until_pong() {
    let (backend, link) = connected_link();
    backend.firmware.ignore_pings.store(1, Ordering::SeqCst);
    backend
        .firmware
        .reply_to_pings(Duration::from_millis(5), PONG);

    assert!(link.verify(fast_policy()).await);
    assert_eq!(backend.firmware.pings_written(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn verify_gives_up_after_all_attempts() {
    let (backend, link) = connected_link();
    assert!(!link.verify(fast_policy()).await);
    assert_eq!(backend.firmware.pings_written(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_pings_are_serialized() {
    let (backend, link) = connected_link();
    backend
        .firmware
        .reply_to_pings(Duration::from_millis(20), PONG);

    let (a, b) = tokio::join!(
        link.ping(Duration::from_millis(500)),
        link.ping(Duration::from_millis(500))
    );
    assert!(a && b);
    assert_eq!(backend.firmware.pings_written(), 2);
}

#[test]
fn coordinator_sink_view_matches_link() {
    let (_backend, link) = connected_link();
    let sink: &dyn CommandSink = &link;
    assert!(sink.is_connected());
    link.close();
    assert!(!sink.is_connected());
}
