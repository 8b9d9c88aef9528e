//! Lighting command coordinator
//!
//! Turns user actions and audio levels into device commands. Everything goes
//! out through a [`CommandSink`]; the coordinator never sees the transport.
//!
//! Music mode sends two things per audio level:
//! - `MUSIC_LEVEL` on every level (unthrottled)
//! - `SET_COLOR` with the base color scaled by the level, at most once per
//!   [`MUSIC_COLOR_INTERVAL`]

use std::sync::Arc;
use std::time::{Duration, Instant};

use argb_transport::protocol::payload;
use argb_transport::{CommandCode, CommandSink};
use tracing::{debug, info, warn};

use crate::color::{music_intensity, scale_color};
use crate::led::{LightingMode, RgbColor};
use crate::settings::Settings;

/// Minimum spacing of music-mode color updates (~8 per second)
pub const MUSIC_COLOR_INTERVAL: Duration = Duration::from_millis(120);

/// Mode and color currently selected by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightingState {
    pub mode: LightingMode,
    pub color: RgbColor,
}

impl LightingState {
    pub fn new(mode: LightingMode, color: RgbColor) -> Self {
        Self { mode, color }
    }
}

/// Rate limiter keyed on caller-supplied timestamps
#[derive(Debug, Clone)]
pub struct MusicThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl MusicThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Claim a slot at `now`; false if the previous one is too recent
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        let ready = self
            .last
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if ready {
            self.last = Some(now);
        }
        ready
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

impl Default for MusicThrottle {
    fn default() -> Self {
        Self::new(MUSIC_COLOR_INTERVAL)
    }
}

/// Maps lighting state and audio levels to outbound commands
pub struct LightingCoordinator<S: CommandSink + ?Sized> {
    sink: Arc<S>,
    max_intensity: u32,
    throttle: MusicThrottle,
}

impl<S: CommandSink + ?Sized> LightingCoordinator<S> {
    pub fn new(sink: Arc<S>, max_intensity: u32) -> Self {
        Self {
            sink,
            max_intensity: max_intensity.max(1),
            throttle: MusicThrottle::default(),
        }
    }

    pub fn set_max_intensity(&mut self, max_intensity: u32) {
        self.max_intensity = max_intensity.max(1);
    }

    pub fn max_intensity(&self) -> u32 {
        self.max_intensity
    }

    fn connected(&self, action: &str) -> bool {
        let connected = self.sink.is_connected();
        if !connected {
            warn!("{}: device not connected", action);
        }
        connected
    }

    /// Handle one audio level
    ///
    /// Returns the color sent, if the throttle let one through.
    pub fn on_audio_level(
        &mut self,
        level: f32,
        state: &LightingState,
        now: Instant,
    ) -> Option<RgbColor> {
        if !self.sink.is_connected() {
            return None;
        }

        self.sink
            .send(CommandCode::MusicLevel, &payload::music_level(level));

        if state.mode != LightingMode::Music || !self.throttle.try_acquire(now) {
            return None;
        }

        let scaled = scale_color(state.color, music_intensity(level, self.max_intensity));
        self.sink.send(CommandCode::SetColor, &scaled.to_bytes());
        debug!("music color {} at level {:.1}", scaled, level);
        Some(scaled)
    }

    /// Send the selected mode; Static also sends its color
    pub fn apply(&mut self, state: &LightingState) -> bool {
        if !self.connected("apply") {
            return false;
        }
        self.sink
            .send(CommandCode::SetMode, &payload::set_mode(state.mode.as_u8()));
        if state.mode == LightingMode::Static {
            self.send_color(state.color);
        }
        self.throttle.reset();
        info!("Applied mode {}", state.mode);
        true
    }

    /// Send a color without changing the mode
    pub fn set_color(&self, color: RgbColor) -> bool {
        if !self.connected("set color") {
            return false;
        }
        self.send_color(color);
        true
    }

    fn send_color(&self, color: RgbColor) {
        let [r, g, b] = color.to_bytes();
        self.sink
            .send(CommandCode::SetColor, &payload::set_color(r, g, b));
    }

    /// Turn the LEDs off
    pub fn off(&self) -> bool {
        if !self.connected("off") {
            return false;
        }
        self.sink.send(CommandCode::Off, &[]);
        info!("LEDs off");
        true
    }

    /// Restore saved mode and color after (re)connecting
    pub fn rearm(&mut self, settings: &Settings) -> bool {
        if !self.connected("re-arm") {
            return false;
        }
        self.sink
            .send(CommandCode::SetMode, &payload::set_mode(settings.mode.as_u8()));
        self.send_color(settings.color);
        self.set_max_intensity(settings.audio.max_intensity);
        self.throttle.reset();
        info!("Re-armed device: mode {} color {}", settings.mode, settings.color);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        connected: AtomicBool,
        sent: Mutex<Vec<(CommandCode, Vec<u8>)>>,
    }

    impl RecordingSink {
        fn connected() -> Arc<Self> {
            let sink = Self::default();
            sink.connected.store(true, Ordering::SeqCst);
            Arc::new(sink)
        }

        fn take(&self) -> Vec<(CommandCode, Vec<u8>)> {
            std::mem::take(&mut *self.sent.lock())
        }
    }

    impl CommandSink for RecordingSink {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn send(&self, cmd: CommandCode, payload: &[u8]) {
            self.sent.lock().push((cmd, payload.to_vec()));
        }
    }

    fn music_green() -> LightingState {
        LightingState::new(LightingMode::Music, RgbColor::new(0, 255, 0))
    }

    #[test]
    fn test_music_color_scaling() {
        let sink = RecordingSink::connected();
        let mut coord = LightingCoordinator::new(Arc::clone(&sink), 100);
        let t0 = Instant::now();

        let full = coord.on_audio_level(100.0, &music_green(), t0);
        assert_eq!(full, Some(RgbColor::new(0, 255, 0)));

        let silent = coord.on_audio_level(0.0, &music_green(), t0 + Duration::from_millis(200));
        assert_eq!(silent, Some(RgbColor::new(0, 63, 0)));

        let sent = sink.take();
        assert_eq!(
            sent,
            vec![
                (CommandCode::MusicLevel, vec![100]),
                (CommandCode::SetColor, vec![0, 255, 0]),
                (CommandCode::MusicLevel, vec![0]),
                (CommandCode::SetColor, vec![0, 63, 0]),
            ]
        );
    }

    #[test]
    fn test_music_color_throttle() {
        let sink = RecordingSink::connected();
        let mut coord = LightingCoordinator::new(Arc::clone(&sink), 100);
        let t0 = Instant::now();

        assert!(coord.on_audio_level(50.0, &music_green(), t0).is_some());
        assert!(coord
            .on_audio_level(50.0, &music_green(), t0 + Duration::from_millis(50))
            .is_none());
        assert!(coord
            .on_audio_level(50.0, &music_green(), t0 + Duration::from_millis(150))
            .is_some());

        let sent = sink.take();
        let levels = sent
            .iter()
            .filter(|(c, _)| *c == CommandCode::MusicLevel)
            .count();
        let colors = sent
            .iter()
            .filter(|(c, _)| *c == CommandCode::SetColor)
            .count();
        assert_eq!(levels, 3, "MUSIC_LEVEL is never throttled");
        assert_eq!(colors, 2);
    }

    #[test]
    fn test_level_payload_truncated_and_capped() {
        let sink = RecordingSink::connected();
        let mut coord = LightingCoordinator::new(Arc::clone(&sink), 100);
        let state = LightingState::new(LightingMode::Rainbow, RgbColor::WHITE);

        coord.on_audio_level(42.9, &state, Instant::now());
        coord.on_audio_level(180.0, &state, Instant::now());

        assert_eq!(
            sink.take(),
            vec![
                (CommandCode::MusicLevel, vec![42]),
                (CommandCode::MusicLevel, vec![100]),
            ]
        );
    }

    #[test]
    fn test_nothing_sent_while_disconnected() {
        let sink = Arc::new(RecordingSink::default());
        let mut coord = LightingCoordinator::new(Arc::clone(&sink), 100);

        assert!(coord
            .on_audio_level(80.0, &music_green(), Instant::now())
            .is_none());
        assert!(!coord.apply(&music_green()));
        assert!(!coord.off());
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_apply_static_sends_color() {
        let sink = RecordingSink::connected();
        let mut coord = LightingCoordinator::new(Arc::clone(&sink), 100);

        assert!(coord.apply(&LightingState::new(LightingMode::Static, RgbColor::CYAN)));
        assert!(coord.apply(&LightingState::new(LightingMode::Chase, RgbColor::CYAN)));

        assert_eq!(
            sink.take(),
            vec![
                (CommandCode::SetMode, vec![1]),
                (CommandCode::SetColor, vec![0, 255, 255]),
                (CommandCode::SetMode, vec![4]),
            ]
        );
    }

    #[test]
    fn test_off_and_rearm() {
        let sink = RecordingSink::connected();
        let mut coord = LightingCoordinator::new(Arc::clone(&sink), 100);
        let settings = Settings {
            mode: LightingMode::Breathing,
            color: RgbColor::new(10, 20, 30),
            ..Settings::default()
        };

        assert!(coord.off());
        assert!(coord.rearm(&settings));

        assert_eq!(
            sink.take(),
            vec![
                (CommandCode::Off, vec![]),
                (CommandCode::SetMode, vec![3]),
                (CommandCode::SetColor, vec![10, 20, 30]),
            ]
        );
    }

    #[test]
    fn test_max_intensity_floor() {
        let sink = RecordingSink::connected();
        let mut coord = LightingCoordinator::new(Arc::clone(&sink), 0);
        assert_eq!(coord.max_intensity(), 1);
        let color = coord.on_audio_level(1.0, &music_green(), Instant::now());
        assert_eq!(color, Some(RgbColor::new(0, 255, 0)));
    }

    #[test]
    fn test_throttle_ignores_clock_going_backwards() {
        let mut throttle = MusicThrottle::default();
        let t0 = Instant::now() + Duration::from_secs(1);
        assert!(throttle.try_acquire(t0));
        assert!(!throttle.try_acquire(t0 - Duration::from_millis(500)));
        assert!(throttle.try_acquire(t0 + MUSIC_COLOR_INTERVAL));
    }
}
