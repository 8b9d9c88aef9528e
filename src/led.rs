//! Lighting mode and color types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error parsing a color or mode from text
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid hex color '{0}' (expected RRGGBB or #RRGGBB)")]
    Color(String),
    #[error("unknown lighting mode '{0}'")]
    Mode(String),
}

/// RGB color value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    /// Create a new RGB color
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB` or `RRGGBB`
    pub fn from_hex(hex: &str) -> Result<Self, ParseError> {
        let digits = hex.trim();
        let digits = digits.strip_prefix('#').unwrap_or(digits);
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(ParseError::Color(hex.to_string()));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| ParseError::Color(hex.to_string()))
        };
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    /// `#RRGGBB`
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Payload for SET_COLOR
    pub fn to_bytes(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    /// White (all LEDs full)
    pub const WHITE: Self = Self::new(255, 255, 255);
    /// Cyan, the out-of-box static color
    pub const CYAN: Self = Self::new(0, 255, 255);
}

impl fmt::Display for RgbColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for RgbColor {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for RgbColor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RgbColor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Controller lighting mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum LightingMode {
    #[default]
    Static = 1,
    Rainbow = 2,
    Breathing = 3,
    Chase = 4,
    Music = 5,
    Cycle = 6,
    Off = 7,
}

impl LightingMode {
    pub const ALL: [LightingMode; 7] = [
        Self::Static,
        Self::Rainbow,
        Self::Breathing,
        Self::Chase,
        Self::Music,
        Self::Cycle,
        Self::Off,
    ];

    /// Get mode from numeric value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Static),
            2 => Some(Self::Rainbow),
            3 => Some(Self::Breathing),
            4 => Some(Self::Chase),
            5 => Some(Self::Music),
            6 => Some(Self::Cycle),
            7 => Some(Self::Off),
            _ => None,
        }
    }

    /// Out-of-range values are pulled into 1..=7
    pub fn from_u8_clamped(value: u8) -> Self {
        Self::from_u8(value.clamp(1, 7)).unwrap_or_default()
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get the display name for this mode
    pub fn name(&self) -> &'static str {
        match self {
            Self::Static => "Static Color",
            Self::Rainbow => "Rainbow",
            Self::Breathing => "Breathing",
            Self::Chase => "Chase",
            Self::Music => "Music",
            Self::Cycle => "Cycle",
            Self::Off => "Off",
        }
    }
}

impl fmt::Display for LightingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u8())
    }
}

impl FromStr for LightingMode {
    type Err = ParseError;

    /// Accepts the mode number or a case-insensitive name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        if let Ok(n) = key.parse::<u8>() {
            return Self::from_u8(n).ok_or_else(|| ParseError::Mode(s.to_string()));
        }
        match key.as_str() {
            "static" | "static-color" | "solid" => Ok(Self::Static),
            "rainbow" => Ok(Self::Rainbow),
            "breathing" | "breathe" => Ok(Self::Breathing),
            "chase" => Ok(Self::Chase),
            "music" | "audio" => Ok(Self::Music),
            "cycle" => Ok(Self::Cycle),
            "off" => Ok(Self::Off),
            _ => Err(ParseError::Mode(s.to_string())),
        }
    }
}

impl Serialize for LightingMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for LightingMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Ok(Self::from_u8_clamped(raw.clamp(0, 255) as u8))
    }
}
