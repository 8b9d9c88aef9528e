//! Device command handlers.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use argb_driver::led::{LightingMode, RgbColor};
use argb_driver::lighting::{LightingCoordinator, LightingState};
use argb_driver::presence::{
    ConnectivityState, PresenceMonitor, PresenceProbe, StatusReport, POLL_INTERVAL,
};
use argb_transport::protocol::cmd;
use argb_transport::{ascii_preview, hex_dump, LinkEvent, PingPolicy};
use tokio::sync::broadcast::error::TryRecvError;

use super::{describe, setup_interrupt_handler, CommandResult, Context};

/// Show attached devices and connectivity
pub fn status(ctx: &Context, json: bool) -> CommandResult {
    let link = ctx.link()?;
    let state = link.connectivity(ctx.vid, ctx.pid);

    if json {
        let report = StatusReport {
            vid: ctx.vid,
            pid: ctx.pid,
            connectivity: state,
            devices: link.devices(),
            saved_mode: ctx.settings.mode,
            saved_color: ctx.settings.color,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Controller VID={:04X} PID={:04X}", ctx.vid, ctx.pid);
    println!("  Status: {}", describe(state));
    for dev in link.devices() {
        println!(
            "  - {} {} serial={}",
            dev.path,
            dev.product_name.as_deref().unwrap_or("(unnamed)"),
            dev.serial.as_deref().unwrap_or("-")
        );
    }
    println!(
        "  Saved:  mode {} color {}",
        ctx.settings.mode, ctx.settings.color
    );
    Ok(())
}

/// Connect and run the PING policy
pub async fn ping(ctx: &Context) -> CommandResult {
    let link = ctx.connect()?;
    let policy = PingPolicy::default();

    if link.verify(policy).await {
        println!("PONG - firmware responding");
        Ok(())
    } else {
        Err(format!(
            "No PONG after {} attempts ({} ms timeout each)",
            policy.attempts,
            policy.timeout.as_millis()
        )
        .into())
    }
}

/// Set the lighting mode; Static also sends the saved color
pub fn mode(ctx: &mut Context, mode: &str, save: bool) -> CommandResult {
    let mode: LightingMode = mode.parse()?;
    let link = ctx.connect()?;
    let mut coordinator = LightingCoordinator::new(link, ctx.settings.audio.max_intensity);

    coordinator.apply(&LightingState::new(mode, ctx.settings.color));
    println!("Mode set: {mode}");

    if save {
        ctx.settings.mode = mode;
        ctx.settings.save(&ctx.settings_path)?;
    }
    Ok(())
}

/// Send a color
pub fn color(ctx: &mut Context, color: &str, save: bool) -> CommandResult {
    let color: RgbColor = color.parse()?;
    let link = ctx.connect()?;
    let coordinator = LightingCoordinator::new(link, ctx.settings.audio.max_intensity);

    coordinator.set_color(color);
    println!("Color set: {color}");

    if save {
        ctx.settings.color = color;
        ctx.settings.save(&ctx.settings_path)?;
    }
    Ok(())
}

/// Turn LEDs off
pub fn off(ctx: &Context) -> CommandResult {
    let link = ctx.connect()?;
    let coordinator = LightingCoordinator::new(link, ctx.settings.audio.max_intensity);
    coordinator.off();
    println!("LEDs off");
    Ok(())
}

/// Restore saved mode and color
pub async fn apply(ctx: &Context) -> CommandResult {
    let link = ctx.connect()?;
    if !link.verify(PingPolicy::default()).await {
        eprintln!("Warning: firmware did not answer PING; sending anyway");
    }

    let mut coordinator = LightingCoordinator::new(link, ctx.settings.audio.max_intensity);
    coordinator.rearm(&ctx.settings);
    println!(
        "Applied saved mode {} with color {}",
        ctx.settings.mode, ctx.settings.color
    );
    Ok(())
}

/// Update saved settings without touching the device
pub fn save(ctx: &mut Context, mode: Option<&str>, color: Option<&str>) -> CommandResult {
    if let Some(mode) = mode {
        ctx.settings.mode = mode.parse()?;
    }
    if let Some(color) = color {
        ctx.settings.color = color.parse()?;
    }
    ctx.settings.vid = ctx.vid;
    ctx.settings.pid = ctx.pid;
    ctx.settings.save(&ctx.settings_path)?;
    println!(
        "Saved mode {} color {} to {}",
        ctx.settings.mode,
        ctx.settings.color,
        ctx.settings_path.display()
    );
    Ok(())
}

/// Send a raw command byte with payload
pub fn raw(ctx: &Context, cmd_byte: u8, payload: &[u8]) -> CommandResult {
    let link = ctx.connect()?;
    link.send_raw(cmd_byte, payload)?;
    println!(
        "Sent 0x{:02X} ({}) payload [{}]",
        cmd_byte,
        cmd::name(cmd_byte),
        hex_dump(payload)
    );
    Ok(())
}

/// Print inbound frames and connectivity transitions until Ctrl+C
pub async fn monitor(ctx: &Context) -> CommandResult {
    let link = ctx.link()?;
    let running = setup_interrupt_handler();

    link.start_reading(Some(Arc::new(|data: &[u8]| {
        println!("<< {}  \"{}\"", hex_dump(data), ascii_preview(data));
    })));
    let mut link_events = link.subscribe();

    let presence = PresenceMonitor::spawn(Arc::clone(&link), ctx.vid, ctx.pid, POLL_INTERVAL);
    let mut connectivity = presence.subscribe();

    println!("Monitoring VID={:04X} PID={:04X}. Press Ctrl+C to stop", ctx.vid, ctx.pid);

    while running.load(Ordering::SeqCst) {
        match connectivity.try_recv() {
            Ok(state) => {
                println!("-- {}", describe(state));
                if state == ConnectivityState::Present {
                    if let Err(e) = link.connect(ctx.vid, ctx.pid) {
                        eprintln!("Connect failed: {e}");
                    } else if link.verify(PingPolicy::default()).await {
                        println!("-- PONG received");
                    }
                }
            }
            Err(TryRecvError::Closed) => break,
            Err(_) => {}
        }

        match link_events.try_recv() {
            Ok(LinkEvent::StateChanged(state)) => println!("-- link {state}"),
            Ok(LinkEvent::Inbound(_)) | Err(_) => {}
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    link.close();
    Ok(())
}
