// Color scaling for audio-reactive lighting

use crate::led::RgbColor;

/// Brightness floor in music mode (25%), reached at silence
pub const MUSIC_MIN_BRIGHTNESS: f32 = 0.25;

/// Map an audio level to a brightness factor in [0.25, 1.0]
///
/// `level / max(1, max_intensity)` is clamped to [0, 1] first.
pub fn music_intensity(level: f32, max_intensity: u32) -> f32 {
    let normalized = level / (max_intensity.max(1) as f32);
    let normalized = if normalized.is_nan() {
        0.0
    } else {
        normalized.clamp(0.0, 1.0)
    };
    MUSIC_MIN_BRIGHTNESS + (1.0 - MUSIC_MIN_BRIGHTNESS) * normalized
}

/// Scale every channel by `factor`, truncating toward zero
pub fn scale_color(color: RgbColor, factor: f32) -> RgbColor {
    let scale = |c: u8| (c as f32 * factor).clamp(0.0, 255.0) as u8;
    RgbColor::new(scale(color.r), scale(color.g), scale(color.b))
}
