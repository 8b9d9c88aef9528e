//! RP2040 ARGB Controller Driver CLI
//!
//! A command-line interface for controlling ARGB fan controllers.

use clap::Parser;
use tracing_subscriber::EnvFilter;

// CLI definitions
mod cli;
use cli::{Cli, Commands};

// Command handlers
mod commands;
use commands::Context;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("argb_driver=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    // PULSE_SOURCE must be set while the process is still single-threaded
    if cli.command.as_ref().is_some_and(Commands::uses_monitor_source) {
        argb_driver::audio_reactive::route_monitor_source();
    }

    tokio::runtime::Runtime::new()?.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = Context::new(cli.vid, cli.pid, cli.log_file, cli.config)?;

    match cli.command {
        None => {
            commands::device::status(&ctx, false)?;
        }
        Some(Commands::Status { json }) => {
            commands::device::status(&ctx, json)?;
        }

        // === Device Commands ===
        Some(Commands::Ping) => {
            commands::device::ping(&ctx).await?;
        }
        Some(Commands::Mode { mode, save }) => {
            commands::device::mode(&mut ctx, &mode, save)?;
        }
        Some(Commands::Color { color, save }) => {
            commands::device::color(&mut ctx, &color, save)?;
        }
        Some(Commands::Off) => {
            commands::device::off(&ctx)?;
        }
        Some(Commands::Apply) => {
            commands::device::apply(&ctx).await?;
        }
        Some(Commands::Save { mode, color }) => {
            commands::device::save(&mut ctx, mode.as_deref(), color.as_deref())?;
        }

        // === Audio Commands ===
        Some(Commands::Music {
            color,
            device,
            tuning,
        }) => {
            commands::reactive::music(&ctx, color.as_deref(), device, &tuning).await?;
        }
        Some(Commands::AudioDevices { device }) => {
            commands::reactive::audio_devices(device.as_deref())?;
        }
        Some(Commands::AudioLevels {
            seconds,
            device,
            tuning,
        }) => {
            commands::reactive::audio_levels(&ctx, seconds, device, &tuning).await?;
        }

        // === Utility Commands ===
        Some(Commands::Monitor) => {
            commands::device::monitor(&ctx).await?;
        }
        Some(Commands::Raw { cmd, payload }) => {
            commands::device::raw(&ctx, cmd, &payload)?;
        }
    }

    Ok(())
}
