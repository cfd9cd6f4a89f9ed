//! PCM Stream Receiver
//!
//! Binds the streaming port, decodes incoming datagrams, and reports
//! liveness and loss. Mostly a wire-format validator for the sender.

use anyhow::Result;
use std::net::UdpSocket;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use udp_mic_streamer::constants::MAX_PACKET_SIZE;
use udp_mic_streamer::net::{decode_frame, SequenceTracker};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port: u16 = std::env::args()
        .nth(1)
        .map(|p| p.parse())
        .transpose()?
        .unwrap_or(5000);

    let socket = UdpSocket::bind(("0.0.0.0", port))?;
    socket.set_read_timeout(Some(Duration::from_secs(1)))?;
    tracing::info!("Listening on port {}", port);

    let mut buf = [0u8; MAX_PACKET_SIZE];
    let mut packets: u64 = 0;
    let mut bytes: u64 = 0;
    let mut invalid: u64 = 0;
    let mut tracker = SequenceTracker::new();
    let mut last_stats_time = Instant::now();
    let mut last_packet_time: Option<Instant> = None;
    let mut live = false;

    loop {
        match socket.recv_from(&mut buf) {
            Ok((len, peer)) => {
                if !live {
                    tracing::info!(%peer, "stream is live");
                    live = true;
                }
                last_packet_time = Some(Instant::now());
                match decode_frame(&buf[..len]) {
                    Ok(frame) => {
                        packets += 1;
                        bytes += len as u64;
                        let gap = tracker.observe(frame.sequence);
                        if gap > 0 {
                            tracing::debug!(got = frame.sequence, gap, "sequence gap");
                        }
                    }
                    Err(e) => {
                        invalid += 1;
                        tracing::warn!("invalid packet from {}: {}", peer, e);
                    }
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                let quiet = last_packet_time
                    .map(|t| t.elapsed() >= Duration::from_secs(3))
                    .unwrap_or(false);
                if live && quiet {
                    tracing::info!("stream went quiet");
                    live = false;
                }
            }
            Err(e) => return Err(e.into()),
        }

        if last_stats_time.elapsed() >= Duration::from_secs(5) {
            last_stats_time = Instant::now();
            let lost = tracker.lost();
            let loss_rate = if packets + lost > 0 {
                lost as f64 / (packets + lost) as f64 * 100.0
            } else {
                0.0
            };
            tracing::info!(
                "Receiver stats: {} packets, {:.1} KB, {} lost ({:.1}% loss), {} invalid",
                packets,
                bytes as f64 / 1024.0,
                lost,
                loss_rate,
                invalid
            );
        }
    }
}
