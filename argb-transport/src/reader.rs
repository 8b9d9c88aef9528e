//! Dedicated inbound read loop
//!
//! Runs on its own thread so a pending read never blocks outbound sends.
//! Cancellation is cooperative: the shutdown flag is checked on every
//! iteration, and the short read timeout bounds how long that takes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::backend::ReportReader;
use crate::error::TransportError;
use crate::protocol::{timing, REPORT_SIZE};

/// Receiver of everything the read loop produces
pub(crate) trait InboundSink: Send + Sync + 'static {
    /// Called with every non-empty buffer
    fn on_inbound(&self, data: &[u8]);

    /// Called once when a read fails; the loop exits afterwards
    fn on_read_error(&self, err: &TransportError);
}

/// Read loop tuning
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReaderConfig {
    /// Read timeout in milliseconds (for checking shutdown flag when idle)
    pub read_timeout_ms: i32,
    /// Size of the single reusable read buffer
    pub buffer_len: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: timing::READ_TIMEOUT_MS,
            buffer_len: REPORT_SIZE,
        }
    }
}

/// Handle to a running read loop
pub(crate) struct ReaderHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// Spawn the loop on a named thread
    pub fn spawn<S: InboundSink>(
        reader: Box<dyn ReportReader>,
        sink: Arc<S>,
        config: ReaderConfig,
    ) -> Result<Self, TransportError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);

        let thread = thread::Builder::new()
            .name("argb-hid-reader".into())
            .spawn(move || run_read_loop(reader, sink, shutdown_clone, config))
            .map_err(|e| TransportError::Hid(format!("failed to spawn reader thread: {e}")))?;

        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    /// Signal cancellation and wait for the loop to exit
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            // close() may be reached from the inbound callback itself
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                warn!("HID reader thread panicked");
            }
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn run_read_loop<S: InboundSink>(
    mut reader: Box<dyn ReportReader>,
    sink: Arc<S>,
    shutdown: Arc<AtomicBool>,
    config: ReaderConfig,
) {
    debug!("HID reader thread started");
    let mut buf = vec![0u8; config.buffer_len.max(REPORT_SIZE)];

    while !shutdown.load(Ordering::Relaxed) {
        match reader.read_report(&mut buf, config.read_timeout_ms) {
            Ok(len) if len > 0 => {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                sink.on_inbound(&buf[..len]);
            }
            Ok(_) => {
                // Timeout, no data - loop continues to check shutdown
            }
            Err(e) => {
                if !shutdown.load(Ordering::Relaxed) {
                    warn!("HID reader error, stopping read loop: {}", e);
                    sink.on_read_error(&e);
                }
                break;
            }
        }
    }

    debug!("HID reader thread exiting");
}
