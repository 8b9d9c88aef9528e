// CLI definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a 16-bit id given as hex (`20A0`, `0x20a0`)
pub fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex id '{s}': {e}"))
}

/// Parse one byte given as hex (`aa`, `0xAA`)
pub fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid hex byte '{s}': {e}"))
}

#[derive(Parser)]
#[command(name = "argb_driver")]
#[command(author, version, about = "RP2040 ARGB fan controller Linux driver")]
#[command(propagate_version = true)]
pub struct Cli {
    /// USB vendor id in hex (default from settings, 20A0)
    #[arg(long, global = true, value_parser = parse_hex_u16)]
    pub vid: Option<u16>,

    /// USB product id in hex (default from settings, 423D)
    #[arg(long, global = true, value_parser = parse_hex_u16)]
    pub pid: Option<u16>,

    /// Append every sent/received frame to this file
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Settings file (default: per-user config dir)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Audio tuning overrides; unset values come from settings
#[derive(clap::Args, Debug, Clone, Default)]
pub struct TuningArgs {
    /// Gain after noise floor (0.5 - 3.0)
    #[arg(long)]
    pub sensitivity: Option<f32>,
    /// Smoothing (0.0 = instant, 1.0 = very smooth)
    #[arg(long)]
    pub smoothing: Option<f32>,
    /// RMS treated as silence (0.0 - 0.5)
    #[arg(long)]
    pub noise_floor: Option<f32>,
    /// Upper bound of the level (1 - 100)
    #[arg(long)]
    pub max_intensity: Option<u32>,
}

#[derive(Subcommand)]
pub enum Commands {
    // === Device Commands ===
    /// Show whether the controller is attached and connectable
    #[command(visible_aliases = ["info", "s"])]
    Status {
        /// Print a JSON object instead of text
        #[arg(long)]
        json: bool,
    },

    /// Check firmware liveness (PING/PONG, 3 attempts)
    #[command(visible_alias = "p")]
    Ping,

    /// Set lighting mode (1-7 or static, rainbow, breathing, chase, music, cycle, off)
    #[command(visible_alias = "m")]
    Mode {
        mode: String,
        /// Also store as the saved mode
        #[arg(long)]
        save: bool,
    },

    /// Set static color (#RRGGBB)
    #[command(visible_alias = "c")]
    Color {
        color: String,
        /// Also store as the saved color
        #[arg(long)]
        save: bool,
    },

    /// Turn LEDs off
    Off,

    /// Connect and restore saved mode and color
    #[command(visible_alias = "a")]
    Apply,

    /// Store mode and/or color without touching the device
    Save {
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },

    // === Audio Commands ===
    /// Audio-reactive lighting until Ctrl+C
    #[command(visible_alias = "audio")]
    Music {
        /// Base color (#RRGGBB, default: saved color)
        #[arg(long)]
        color: Option<String>,
        /// Capture device name (substring match)
        #[arg(long)]
        device: Option<String>,
        #[command(flatten)]
        tuning: TuningArgs,
    },

    /// List audio capture devices
    #[command(visible_alias = "audio-test")]
    AudioDevices {
        /// Capture device name (substring match)
        #[arg(long)]
        device: Option<String>,
    },

    /// Print live audio levels
    AudioLevels {
        /// Seconds to listen
        #[arg(long, default_value = "5")]
        seconds: u64,
        /// Capture device name (substring match)
        #[arg(long)]
        device: Option<String>,
        #[command(flatten)]
        tuning: TuningArgs,
    },

    // === Utility Commands ===
    /// Print inbound frames and connectivity changes until Ctrl+C
    #[command(visible_alias = "mon")]
    Monitor,

    /// Send a raw command (e.g. `raw 03 ff 00 00`)
    Raw {
        /// Command byte in hex
        #[arg(value_parser = parse_hex_u8)]
        cmd: u8,
        /// Payload bytes in hex
        #[arg(value_parser = parse_hex_u8)]
        payload: Vec<u8>,
    },
}

impl Commands {
    /// Audio commands that auto-select the system monitor source
    pub fn uses_monitor_source(&self) -> bool {
        match self {
            Commands::Music { device, .. }
            | Commands::AudioDevices { device }
            | Commands::AudioLevels { device, .. } => device.is_none(),
            _ => false,
        }
    }
}
