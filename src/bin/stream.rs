//! Microphone Streaming Application
//!
//! Captures the default input device and streams raw PCM frames to a
//! receiver over UDP.

use anyhow::Result;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use udp_mic_streamer::{
    audio::device::list_input_devices, CaptureState, LifecycleController, StreamConfig,
};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting microphone streamer");

    // List available input devices
    println!("\n=== Available Input Devices ===");
    for name in list_input_devices() {
        println!("  {}", name);
    }
    println!();

    // Destination and optional device name from args
    let mut config = StreamConfig::default();
    if let Some(target) = std::env::args().nth(1) {
        let (host, port) = target
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("destination must be host:port"))?;
        config.destination_host = host.to_string();
        config.destination_port = port.parse()?;
    }
    config.device_name = std::env::args().nth(2);
    if let Some(name) = &config.device_name {
        tracing::info!("Using input device: {}", name);
    }

    tracing::info!(
        "Target receiver: {}:{}",
        config.destination_host,
        config.destination_port
    );

    let controller = LifecycleController::new();
    let events = controller.subscribe();
    controller.start(&config, None)?;

    tracing::info!("Streaming started - press Enter to stop");

    // Watch for runtime failures while waiting for operator input
    let stdin_done = {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        std::thread::spawn(move || {
            let mut line = String::new();
            let _ = std::io::stdin().read_line(&mut line);
            let _ = tx.send(());
        });
        rx
    };

    let mut last_stats_time = Instant::now();
    loop {
        if stdin_done.try_recv().is_ok() {
            break;
        }
        if let Ok(CaptureState::Failed(reason)) = events.try_recv() {
            tracing::error!(?reason, "session failed, shutting down");
            break;
        }

        if last_stats_time.elapsed() >= Duration::from_secs(5) {
            last_stats_time = Instant::now();
            if let Some(stats) = controller.transmitter_stats() {
                let snapshot = stats.snapshot();
                tracing::info!(
                    "Stats: {} packets sent, {:.1} KB, {} send failures",
                    snapshot.packets_sent,
                    snapshot.bytes_sent as f64 / 1024.0,
                    snapshot.send_failures
                );
            }
        }

        std::thread::sleep(Duration::from_millis(50));
    }

    controller.stop()?;
    tracing::info!("Stopped");
    Ok(())
}
