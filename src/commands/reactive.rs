//! Reactive mode command handlers (music, audio-devices, audio-levels).

use std::io::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use argb_driver::audio_reactive::{self, AudioSession};
use argb_driver::led::{LightingMode, RgbColor};
use argb_driver::lighting::{LightingCoordinator, LightingState};
use argb_driver::presence::{ConnectivityState, PresenceMonitor, POLL_INTERVAL};
use argb_transport::PingPolicy;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, info, warn};

use super::{describe, setup_interrupt_handler, CommandResult, Context};
use crate::cli::TuningArgs;

/// Width of the text level meter
const METER_WIDTH: usize = 50;

fn meter(level: f32, max: u32) -> String {
    let filled = ((level / max.max(1) as f32) * METER_WIDTH as f32).clamp(0.0, METER_WIDTH as f32)
        as usize;
    format!("[{}{}]", "#".repeat(filled), " ".repeat(METER_WIDTH - filled))
}

/// Run audio reactive lighting until Ctrl+C
pub async fn music(
    ctx: &Context,
    color: Option<&str>,
    device: Option<String>,
    tuning: &TuningArgs,
) -> CommandResult {
    let base_color: RgbColor = match color {
        Some(c) => c.parse()?,
        None => ctx.settings.color,
    };
    let state = LightingState::new(LightingMode::Music, base_color);
    let config = ctx.tuning(tuning);

    let link = ctx.connect()?;
    if !link.verify(PingPolicy::default()).await {
        eprintln!("Warning: firmware did not answer PING; continuing");
    }

    let mut coordinator = LightingCoordinator::new(Arc::clone(&link), config.max_intensity);
    coordinator.apply(&state);

    let mut session = AudioSession::new(config).with_device(device);
    let mut levels = session.subscribe();
    session.start()?;

    println!(
        "Music mode on {} with base color {}",
        session.device_name().unwrap_or("audio input"),
        base_color
    );
    println!(
        "sensitivity {:.2}  smoothing {:.2}  noise floor {:.3}  max intensity {}",
        config.sensitivity, config.smoothing, config.noise_floor, config.max_intensity
    );
    println!("Press Ctrl+C to stop");

    let running = setup_interrupt_handler();
    let presence = PresenceMonitor::spawn(Arc::clone(&link), ctx.vid, ctx.pid, POLL_INTERVAL);
    let mut connectivity = presence.subscribe();
    let mut last_print = Instant::now();

    while running.load(Ordering::SeqCst) {
        match tokio::time::timeout(Duration::from_millis(100), levels.recv()).await {
            Ok(Ok(level)) => {
                coordinator.on_audio_level(level, &state, Instant::now());
                if last_print.elapsed() >= Duration::from_millis(100) {
                    print!("\r  {:5.1} {}", level, meter(level, config.max_intensity));
                    std::io::stdout().flush().ok();
                    last_print = Instant::now();
                }
            }
            Ok(Err(RecvError::Lagged(n))) => debug!("dropped {} audio levels", n),
            Ok(Err(RecvError::Closed)) => break,
            Err(_) => {
                if !session.is_running() {
                    warn!("Audio capture ended unexpectedly");
                    break;
                }
            }
        }

        match connectivity.try_recv() {
            Ok(ConnectivityState::Present) => {
                println!("\n-- {}; reconnecting", describe(ConnectivityState::Present));
                match link.connect(ctx.vid, ctx.pid) {
                    Ok(()) => {
                        coordinator.apply(&state);
                        info!("Reconnected; music mode re-applied");
                    }
                    Err(e) => warn!("Reconnect failed: {}", e),
                }
            }
            Ok(other) => println!("\n-- {}", describe(other)),
            Err(TryRecvError::Closed) => break,
            Err(_) => {}
        }
    }

    println!();
    session.stop();
    link.close();
    println!("Music mode stopped");
    Ok(())
}

/// List capture devices and the one music mode would use
pub fn audio_devices(device: Option<&str>) -> CommandResult {
    println!("Available audio devices:");
    for name in audio_reactive::list_audio_devices() {
        println!("  - {name}");
    }
    println!();

    match audio_reactive::describe_capture_device(device) {
        Ok(input) => {
            println!("Capture device: {}", input.name);
            println!("Sample rate: {} Hz", input.sample_rate);
            println!("Channels: {}", input.channels);
            println!("Sample format: {}", input.sample_format);
        }
        Err(e) => eprintln!("Audio test failed: {e}"),
    }
    Ok(())
}

/// Print the extracted level once per second
pub async fn audio_levels(
    ctx: &Context,
    seconds: u64,
    device: Option<String>,
    tuning: &TuningArgs,
) -> CommandResult {
    let config = ctx.tuning(tuning);
    let mut session = AudioSession::new(config).with_device(device);
    let mut levels = session.subscribe();
    session.start()?;

    println!(
        "Using device: {}",
        session.device_name().unwrap_or("Unknown")
    );
    println!("\nListening for {seconds} seconds...");

    let running = setup_interrupt_handler();
    for second in 1..=seconds {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut blocks = 0u32;
        let mut peak = 0.0f32;
        loop {
            match levels.try_recv() {
                Ok(level) => {
                    blocks += 1;
                    peak = peak.max(level);
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }

        println!(
            "  Second {}: {} blocks, peak: {:5.1} {}",
            second,
            blocks,
            peak,
            meter(peak, config.max_intensity)
        );
    }

    session.stop();
    Ok(())
}
