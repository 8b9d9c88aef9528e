// RP2040 ARGB Controller Linux Driver - Shared Library
// Lighting types, audio level extraction, command coordination and settings

pub mod audio_reactive;
pub mod color;
pub mod led;
pub mod lighting;
pub mod presence;
pub mod settings;

pub use audio_reactive::{AudioConfig, AudioError, AudioSession, LevelExtractor, SampleBlock};
pub use led::{LightingMode, RgbColor};
pub use lighting::{LightingCoordinator, LightingState, MusicThrottle, MUSIC_COLOR_INTERVAL};
pub use presence::{ConnectivityState, PresenceMonitor, PresenceProbe, StatusReport};
pub use settings::{Settings, SettingsError};
