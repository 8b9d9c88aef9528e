// Audio Reactive Lighting
// Captures system audio and turns it into a smoothed intensity level

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Perceptual compression exponent (< 1 lifts quiet passages)
const COMPRESSION_EXPONENT: f32 = 0.6;

/// EMA blend factor bounds
const ALPHA_MIN: f32 = 0.01;
const ALPHA_MAX: f32 = 0.95;

/// Capacity of the level broadcast channel
const LEVEL_CHANNEL_CAPACITY: usize = 64;

/// How often the capture thread checks for shutdown
const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("No audio input device found")]
    NoDevice,
    #[error("Failed to get audio config: {0}")]
    Config(String),
    #[error("Failed to build audio stream: {0}")]
    Stream(String),
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("Audio capture thread failed: {0}")]
    Thread(String),
}

/// Audio reactive mode configuration
///
/// Values outside their range are clamped, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Gain applied after the noise floor (0.5 - 3.0)
    pub sensitivity: f32,
    /// EMA smoothing (0.0 = instant, 1.0 = very smooth)
    pub smoothing: f32,
    /// RMS below this is treated as silence (0.0 - 0.5)
    pub noise_floor: f32,
    /// Upper bound of emitted levels (1 - 100)
    pub max_intensity: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sensitivity: 1.5,
            smoothing: 0.35,
            noise_floor: 0.015,
            max_intensity: 100,
        }
    }
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(min, max)
    }
}

impl AudioConfig {
    pub const SENSITIVITY_RANGE: (f32, f32) = (0.5, 3.0);
    pub const SMOOTHING_RANGE: (f32, f32) = (0.0, 1.0);
    pub const NOISE_FLOOR_RANGE: (f32, f32) = (0.0, 0.5);
    pub const MAX_INTENSITY_RANGE: (u32, u32) = (1, 100);

    /// Copy with every field pulled into range
    pub fn clamped(self) -> Self {
        let defaults = Self::default();
        let (s_lo, s_hi) = Self::SENSITIVITY_RANGE;
        let (m_lo, m_hi) = Self::SMOOTHING_RANGE;
        let (n_lo, n_hi) = Self::NOISE_FLOOR_RANGE;
        let (i_lo, i_hi) = Self::MAX_INTENSITY_RANGE;
        Self {
            sensitivity: clamp_or(self.sensitivity, s_lo, s_hi, defaults.sensitivity),
            smoothing: clamp_or(self.smoothing, m_lo, m_hi, defaults.smoothing),
            noise_floor: clamp_or(self.noise_floor, n_lo, n_hi, defaults.noise_floor),
            max_intensity: self.max_intensity.clamp(i_lo, i_hi),
        }
    }

    /// EMA blend factor derived from smoothing
    pub fn alpha(&self) -> f32 {
        (1.0 - self.smoothing).clamp(ALPHA_MIN, ALPHA_MAX)
    }
}

/// One block of captured samples as delivered by the audio backend
#[derive(Debug, Clone, Copy)]
pub enum SampleBlock<'a> {
    F32(&'a [f32]),
    I16(&'a [i16]),
    /// Any other encoding, inspected byte-wise
    Bytes(&'a [u8]),
}

impl SampleBlock<'_> {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::F32(s) => s.is_empty(),
            Self::I16(s) => s.is_empty(),
            Self::Bytes(b) => b.is_empty(),
        }
    }

    /// Loudness in [0, 1]: RMS for float and 16-bit PCM, mean absolute
    /// byte value / 255 for anything else.
    pub fn normalized_rms(&self) -> f32 {
        let rms = match self {
            Self::F32(samples) => {
                let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
                (sum / samples.len().max(1) as f64).sqrt()
            }
            Self::I16(samples) => {
                let sum: f64 = samples
                    .iter()
                    .map(|&s| {
                        let fs = s as f64 / 32768.0;
                        fs * fs
                    })
                    .sum();
                (sum / samples.len().max(1) as f64).sqrt()
            }
            Self::Bytes(bytes) => {
                let acc: u64 = bytes.iter().map(|&b| b as u64).sum();
                acc as f64 / bytes.len().max(1) as f64 / 255.0
            }
        };
        if rms.is_finite() {
            rms.clamp(0.0, 1.0) as f32
        } else {
            0.0
        }
    }
}

/// Turns sample blocks into a smoothed, bounded intensity level
///
/// Holds the EMA state of one capture session.
#[derive(Debug, Clone)]
pub struct LevelExtractor {
    config: AudioConfig,
    ema: f32,
}

impl LevelExtractor {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config: config.clamped(),
            ema: 0.0,
        }
    }

    /// Takes effect from the next block; EMA state is kept
    pub fn set_config(&mut self, config: AudioConfig) {
        self.config = config.clamped();
    }

    pub fn reset(&mut self) {
        self.ema = 0.0;
    }

    /// Noise floor, gain and compression applied to one RMS value.
    pub fn shape(&self, rms: f32) -> f32 {
        let value = (rms - self.config.noise_floor).max(0.0);
        let value = (value * self.config.sensitivity).min(1.0);
        value.powf(COMPRESSION_EXPONENT)
    }

    /// Process one block. Empty blocks produce no level.
    pub fn process(&mut self, block: SampleBlock<'_>) -> Option<f32> {
        if block.is_empty() {
            return None;
        }

        let value = self.shape(block.normalized_rms());
        let alpha = self.config.alpha();
        self.ema = self.ema * (1.0 - alpha) + value * alpha;

        let max = self.config.max_intensity as f32;
        Some((self.ema * max).clamp(0.0, max))
    }
}

/// Tuning readable from the audio callback without taking a lock
///
/// Fields are published independently; each one is always in range.
#[derive(Debug)]
struct SharedTuning {
    sensitivity: AtomicU32,
    smoothing: AtomicU32,
    noise_floor: AtomicU32,
    max_intensity: AtomicU32,
}

impl SharedTuning {
    fn new(config: AudioConfig) -> Self {
        let config = config.clamped();
        Self {
            sensitivity: AtomicU32::new(config.sensitivity.to_bits()),
            smoothing: AtomicU32::new(config.smoothing.to_bits()),
            noise_floor: AtomicU32::new(config.noise_floor.to_bits()),
            max_intensity: AtomicU32::new(config.max_intensity),
        }
    }

    fn load(&self) -> AudioConfig {
        AudioConfig {
            sensitivity: f32::from_bits(self.sensitivity.load(Ordering::Relaxed)),
            smoothing: f32::from_bits(self.smoothing.load(Ordering::Relaxed)),
            noise_floor: f32::from_bits(self.noise_floor.load(Ordering::Relaxed)),
            max_intensity: self.max_intensity.load(Ordering::Relaxed),
        }
    }

    fn store(&self, config: AudioConfig) {
        let config = config.clamped();
        self.sensitivity
            .store(config.sensitivity.to_bits(), Ordering::Relaxed);
        self.smoothing
            .store(config.smoothing.to_bits(), Ordering::Relaxed);
        self.noise_floor
            .store(config.noise_floor.to_bits(), Ordering::Relaxed);
        self.max_intensity
            .store(config.max_intensity, Ordering::Relaxed);
    }
}

/// Receives the sample blocks of one capture session
///
/// Runs inside the audio callback: it never blocks and never does I/O.
pub struct LevelSink {
    extractor: LevelExtractor,
    tuning: Arc<SharedTuning>,
    levels: broadcast::Sender<f32>,
}

impl LevelSink {
    /// Turn one block into a level and publish it
    pub fn push(&mut self, block: SampleBlock<'_>) {
        self.extractor.set_config(self.tuning.load());
        if let Some(level) = self.extractor.process(block) {
            // No receivers is fine
            let _ = self.levels.send(level);
        }
    }
}

/// Sample types routed through the byte-wise fallback
trait NativeBytes: Copy {
    fn extend_ne(self, out: &mut Vec<u8>);
}

macro_rules! impl_native_bytes {
    ($($t:ty),*) => {
        $(impl NativeBytes for $t {
            fn extend_ne(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }
        })*
    };
}

impl_native_bytes!(i8, i32, i64, u16, u32, u64, f64);

/// A stream opened by a [`CaptureSource`]
pub struct OpenedCapture {
    pub device_name: String,
    /// Keeps the stream alive; dropping it releases the device
    pub stream: Box<dyn Any>,
}

/// Where a session's samples come from
///
/// `open` is called on the session's capture thread, so the returned stream
/// never has to be `Send`.
pub trait CaptureSource: Send + Sync + 'static {
    fn open(&self, preferred: Option<&str>, sink: LevelSink) -> Result<OpenedCapture, AudioError>;
}

/// Captures through cpal's default host
pub struct CpalSource;

impl CaptureSource for CpalSource {
    fn open(&self, preferred: Option<&str>, sink: LevelSink) -> Result<OpenedCapture, AudioError> {
        let (stream, device_name) = open_input_stream(preferred, sink)?;
        Ok(OpenedCapture {
            device_name,
            stream: Box::new(stream),
        })
    }
}

struct CaptureThread {
    shutdown: Arc<AtomicBool>,
    thread: JoinHandle<()>,
    device_name: String,
}

/// A running (or stopped) audio capture session
///
/// The cpal stream is not `Send`, so it lives on a dedicated thread for the
/// lifetime of the session. Levels are published on a broadcast channel.
pub struct AudioSession {
    tuning: Arc<SharedTuning>,
    levels: broadcast::Sender<f32>,
    source: Arc<dyn CaptureSource>,
    preferred_device: Option<String>,
    capture: Option<CaptureThread>,
}

impl AudioSession {
    pub fn new(config: AudioConfig) -> Self {
        let (levels, _) = broadcast::channel(LEVEL_CHANNEL_CAPACITY);
        Self {
            tuning: Arc::new(SharedTuning::new(config)),
            levels,
            source: Arc::new(CpalSource),
            preferred_device: None,
            capture: None,
        }
    }

    /// Capture from the input device whose name contains `name`
    pub fn with_device(mut self, name: Option<String>) -> Self {
        self.preferred_device = name;
        self
    }

    /// Capture from `source` instead of the cpal default host
    pub fn with_source(mut self, source: Arc<dyn CaptureSource>) -> Self {
        self.source = source;
        self
    }

    /// Receive every level produced while the session runs
    pub fn subscribe(&self) -> broadcast::Receiver<f32> {
        self.levels.subscribe()
    }

    pub fn tuning(&self) -> AudioConfig {
        self.tuning.load()
    }

    /// Update tuning; a running session picks it up on the next block
    pub fn update_tuning(&self, config: AudioConfig) {
        self.tuning.store(config);
    }

    pub fn is_running(&self) -> bool {
        self.capture
            .as_ref()
            .is_some_and(|c| !c.thread.is_finished())
    }

    /// Name of the device being captured
    pub fn device_name(&self) -> Option<&str> {
        self.capture.as_ref().map(|c| c.device_name.as_str())
    }

    /// Start capturing with a fresh EMA; restarts if already running.
    pub fn start(&mut self) -> Result<(), AudioError> {
        self.stop();

        let shutdown = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();
        let sink = LevelSink {
            extractor: LevelExtractor::new(self.tuning()),
            tuning: Arc::clone(&self.tuning),
            levels: self.levels.clone(),
        };
        let source = Arc::clone(&self.source);
        let preferred = self.preferred_device.clone();
        let shutdown_clone = Arc::clone(&shutdown);

        let thread = thread::Builder::new()
            .name("argb-audio-capture".into())
            .spawn(move || run_capture(source, preferred, sink, shutdown_clone, ready_tx))
            .map_err(|e| AudioError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(device_name)) => {
                info!("Audio capture started on {}", device_name);
                self.capture = Some(CaptureThread {
                    shutdown,
                    thread,
                    device_name,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::Thread("capture thread exited during setup".into()))
            }
        }
    }

    /// Stop capturing and release the device. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.shutdown.store(true, Ordering::SeqCst);
            if capture.thread.join().is_err() {
                warn!("Audio capture thread panicked");
            }
            info!("Audio capture stopped");
        }
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the capture thread: owns the stream until shutdown
fn run_capture(
    source: Arc<dyn CaptureSource>,
    preferred: Option<String>,
    sink: LevelSink,
    shutdown: Arc<AtomicBool>,
    ready: mpsc::Sender<Result<String, AudioError>>,
) {
    let stream = match source.open(preferred.as_deref(), sink) {
        Ok(opened) => {
            let _ = ready.send(Ok(opened.device_name));
            opened.stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(CAPTURE_POLL_INTERVAL);
    }

    drop(stream);
    debug!("Audio capture thread exiting");
}

fn open_input_stream(
    preferred: Option<&str>,
    sink: LevelSink,
) -> Result<(cpal::Stream, String), AudioError> {
    let host = cpal::default_host();
    let device = find_audio_device(&host, preferred)?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::Config(e.to_string()))?;
    debug!(
        "Capture format: {:?}, {} Hz, {} channels",
        supported.sample_format(),
        supported.sample_rate().0,
        supported.channels()
    );

    let stream = build_stream(&device, supported.sample_format(), &supported.config(), sink)?;
    stream
        .play()
        .map_err(|e| AudioError::Stream(format!("failed to start: {e}")))?;
    Ok((stream, name))
}

fn stream_error(err: cpal::StreamError) {
    warn!("Audio stream error: {err}");
}

fn build_stream(
    device: &cpal::Device,
    format: SampleFormat,
    config: &cpal::StreamConfig,
    mut sink: LevelSink,
) -> Result<cpal::Stream, AudioError> {
    let result = match format {
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| sink.push(SampleBlock::F32(data)),
            stream_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| sink.push(SampleBlock::I16(data)),
            stream_error,
            None,
        ),
        SampleFormat::U8 => device.build_input_stream(
            config,
            move |data: &[u8], _: &cpal::InputCallbackInfo| sink.push(SampleBlock::Bytes(data)),
            stream_error,
            None,
        ),
        SampleFormat::I8 => build_byte_stream::<i8>(device, config, sink),
        SampleFormat::I32 => build_byte_stream::<i32>(device, config, sink),
        SampleFormat::I64 => build_byte_stream::<i64>(device, config, sink),
        SampleFormat::U16 => build_byte_stream::<u16>(device, config, sink),
        SampleFormat::U32 => build_byte_stream::<u32>(device, config, sink),
        SampleFormat::U64 => build_byte_stream::<u64>(device, config, sink),
        SampleFormat::F64 => build_byte_stream::<f64>(device, config, sink),
        other => return Err(AudioError::UnsupportedFormat(format!("{other:?}"))),
    };
    result.map_err(|e| AudioError::Stream(e.to_string()))
}

/// Stream whose samples are re-encoded into a reused byte buffer
fn build_byte_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut sink: LevelSink,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + NativeBytes + Send + 'static,
{
    let mut scratch: Vec<u8> = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            scratch.clear();
            for &sample in data {
                sample.extend_ne(&mut scratch);
            }
            sink.push(SampleBlock::Bytes(&scratch));
        },
        stream_error,
        None,
    )
}

/// List available audio input devices
pub fn list_audio_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                devices.push(name);
            }
        }
    }

    devices
}

/// Format summary of the device a session would capture from
#[derive(Debug, Clone)]
pub struct InputDescription {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: String,
}

/// Describe the input device `find_audio_device` would pick
pub fn describe_capture_device(preferred: Option<&str>) -> Result<InputDescription, AudioError> {
    let host = cpal::default_host();
    let device = find_audio_device(&host, preferred)?;
    let config = device
        .default_input_config()
        .map_err(|e| AudioError::Config(e.to_string()))?;

    Ok(InputDescription {
        name: device.name().unwrap_or_else(|_| "Unknown".to_string()),
        sample_rate: config.sample_rate().0,
        channels: config.channels(),
        sample_format: format!("{:?}", config.sample_format()),
    })
}

/// Find the best audio device for capture
///
/// Order: a device matching `preferred`, a monitor/loopback source (system
/// audio), the `pulse`/`pipewire` device, then the default input.
pub fn find_audio_device(
    host: &cpal::Host,
    preferred: Option<&str>,
) -> Result<cpal::Device, AudioError> {
    if let Some(wanted) = preferred {
        let wanted = wanted.to_lowercase();
        if let Ok(devices) = host.input_devices() {
            for device in devices {
                if let Ok(name) = device.name() {
                    if name.to_lowercase().contains(&wanted) {
                        info!("Using requested device: {}", name);
                        return Ok(device);
                    }
                }
            }
        }
        warn!("Requested audio device '{}' not found, auto-selecting", wanted);
    }

    if let Ok(devices) = host.input_devices() {
        for device in devices {
            if let Ok(name) = device.name() {
                let name_lower = name.to_lowercase();
                if name_lower.contains("monitor") || name_lower.contains("loopback") {
                    info!("Found monitor device: {}", name);
                    return Ok(device);
                }
            }
        }
    }

    if let Ok(devices) = host.input_devices() {
        for device in devices {
            if let Ok(name) = device.name() {
                if name == "pulse" || name == "pipewire" {
                    info!("Using {} device with monitor source", name);
                    return Ok(device);
                }
            }
        }
    }

    host.default_input_device().ok_or(AudioError::NoDevice)
}

/// Point PulseAudio/PipeWire capture at the system monitor source.
///
/// Sets `PULSE_SOURCE` for the `pulse`/`pipewire` input device unless it is
/// already set. The environment is process-global: call this before any
/// other thread exists.
pub fn route_monitor_source() -> Option<String> {
    if let Ok(existing) = std::env::var("PULSE_SOURCE") {
        debug!("PULSE_SOURCE already set to {}", existing);
        return Some(existing);
    }
    let monitor = get_pulseaudio_monitor()?;
    info!("Setting PULSE_SOURCE={}", monitor);
    std::env::set_var("PULSE_SOURCE", &monitor);
    Some(monitor)
}

/// Get the PulseAudio/PipeWire monitor source name
fn get_pulseaudio_monitor() -> Option<String> {
    // pactl list sources short | grep monitor
    let output = std::process::Command::new("pactl")
        .args(["list", "sources", "short"])
        .output()
        .map_err(|e| debug!("pactl unavailable: {e}"))
        .ok()?;

    parse_monitor_source(&String::from_utf8_lossy(&output.stdout))
}

fn parse_monitor_source(pactl_output: &str) -> Option<String> {
    pactl_output
        .lines()
        .filter_map(|line| line.split('\t').nth(1))
        .find(|name| name.contains(".monitor"))
        .map(str::to_string)
}
