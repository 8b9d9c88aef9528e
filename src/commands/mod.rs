//! Command handlers for the CLI application.
//!
//! - `device`: discrete device actions (status, ping, mode, color, off, apply, save, raw, monitor)
//! - `reactive`: audio-reactive mode and capture diagnostics (music, audio-devices, audio-levels)

pub mod device;
pub mod reactive;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use argb_driver::audio_reactive::AudioConfig;
use argb_driver::presence::ConnectivityState;
use argb_driver::settings::Settings;
use argb_transport::{DeviceLink, FileFrameLog, HidApiBackend, HidBackend, TransportError};
use tracing::{info, warn};

use crate::cli::TuningArgs;

/// Result type for command handlers
pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Global options shared by every handler
pub struct Context {
    pub vid: u16,
    pub pid: u16,
    pub log_file: Option<PathBuf>,
    pub settings_path: PathBuf,
    pub settings: Settings,
}

impl Context {
    /// Resolve settings from disk, then apply command-line overrides
    pub fn new(
        vid: Option<u16>,
        pid: Option<u16>,
        log_file: Option<PathBuf>,
        config: Option<PathBuf>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let settings_path = match config {
            Some(path) => path,
            None => Settings::default_path()?,
        };
        let settings = match Settings::load(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("{e}; using defaults");
                Settings::default()
            }
        };

        Ok(Self {
            vid: vid.unwrap_or(settings.vid),
            pid: pid.unwrap_or(settings.pid),
            log_file,
            settings_path,
            settings,
        })
    }

    /// Link with the frame log chosen on the command line, not yet connected
    pub fn link(&self) -> Result<Arc<DeviceLink>, Box<dyn std::error::Error>> {
        let backend: Arc<dyn HidBackend> = Arc::new(HidApiBackend::new()?);
        let link = match &self.log_file {
            Some(path) => {
                let log = FileFrameLog::open(path)
                    .map_err(|e| format!("Failed to open log file {}: {e}", path.display()))?;
                info!("Logging frames to {}", log.path().display());
                DeviceLink::with_frame_log(backend, Arc::new(log))
            }
            None => DeviceLink::new(backend),
        };
        Ok(Arc::new(link))
    }

    /// Link connected to the configured device
    pub fn connect(&self) -> Result<Arc<DeviceLink>, Box<dyn std::error::Error>> {
        let link = self.link()?;
        if let Err(e) = link.connect(self.vid, self.pid) {
            print_connect_hint(&e);
            return Err(e.into());
        }
        Ok(link)
    }

    /// Saved tuning with command-line overrides applied
    pub fn tuning(&self, args: &TuningArgs) -> AudioConfig {
        let saved = self.settings.audio;
        AudioConfig {
            sensitivity: args.sensitivity.unwrap_or(saved.sensitivity),
            smoothing: args.smoothing.unwrap_or(saved.smoothing),
            noise_floor: args.noise_floor.unwrap_or(saved.noise_floor),
            max_intensity: args.max_intensity.unwrap_or(saved.max_intensity),
        }
        .clamped()
    }
}

fn print_connect_hint(err: &TransportError) {
    match err {
        TransportError::DeviceNotFound { .. } => {
            eprintln!("No controller found. Is it plugged in? Check --vid/--pid.");
        }
        TransportError::OpenFailed(_) => {
            eprintln!("Controller found but could not be opened.");
            eprintln!("You may need a udev rule granting access to its hidraw node.");
        }
        _ => {}
    }
}

/// Human-readable connectivity label
pub fn describe(state: ConnectivityState) -> &'static str {
    match state {
        ConnectivityState::Connected => "Connected - communication active",
        ConnectivityState::Present => "Present - ready to connect",
        ConnectivityState::Disconnected => "Not detected - waiting for controller",
    }
}

/// Set up a Ctrl-C handler that sets the given flag to false when triggered.
/// Returns the Arc<AtomicBool> for use in the main loop.
pub fn setup_interrupt_handler() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })
    .ok();

    running
}
