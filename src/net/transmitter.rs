//! Frame transmission over UDP
//!
//! Each frame becomes exactly one datagram. Sends are fire-and-forget: a
//! failure is logged and the frame dropped so the queue consumer never
//! stalls, but three consecutive failures mean the link is down and the
//! session must fail rather than keep burning frames.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::frame::AudioFrame;
use crate::constants::{MAX_PACKET_SIZE, MAX_SEND_FAILURES};
use crate::error::TransportError;
use crate::net::packet::encode_frame;

/// Host-provided callback mirroring frames to a UI layer.
/// Invoked on the transmit path before the network send; must not block.
pub type FrameSink = Box<dyn Fn(&AudioFrame) + Send>;

/// Time budget for the shutdown drain flush
const FLUSH_BUDGET: Duration = Duration::from_millis(250);

/// Connectionless best-effort datagram sender
pub trait DatagramTransport: Send {
    fn send(&mut self, datagram: &[u8]) -> Result<(), TransportError>;
}

/// UDP transport connected to a fixed destination
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind an ephemeral local port and connect to the destination
    pub fn open(destination: SocketAddr) -> Result<Self, TransportError> {
        let domain = Domain::for_address(destination);
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;
        socket
            .set_send_buffer_size(MAX_PACKET_SIZE * 64)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        let local: SocketAddr = match destination {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        socket
            .bind(&local.into())
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        let socket: UdpSocket = socket.into();
        socket
            .connect(destination)
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        tracing::info!(%destination, "transport session opened");
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket
            .local_addr()
            .map_err(|e| TransportError::BindFailed(e.to_string()))
    }
}

impl DatagramTransport for UdpTransport {
    fn send(&mut self, datagram: &[u8]) -> Result<(), TransportError> {
        self.socket
            .send(datagram)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

/// Shared transmitter counters
#[derive(Default)]
struct Counters {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_failures: AtomicU64,
}

/// Snapshot of transmitter statistics
#[derive(Debug, Clone, Copy)]
pub struct TransmitterStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
}

/// Handle for reading transmitter stats from another thread
#[derive(Clone)]
pub struct StatsHandle {
    counters: Arc<Counters>,
}

impl StatsHandle {
    pub fn snapshot(&self) -> TransmitterStats {
        TransmitterStats {
            packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
        }
    }
}

/// Serializes frames into datagrams and sends them best-effort
pub struct Transmitter {
    transport: Box<dyn DatagramTransport>,
    sink: Option<FrameSink>,
    consecutive_failures: u32,
    counters: Arc<Counters>,
}

impl Transmitter {
    pub fn new(transport: Box<dyn DatagramTransport>, sink: Option<FrameSink>) -> Self {
        Self {
            transport,
            sink,
            consecutive_failures: 0,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Get a cloneable handle for reading stats concurrently
    pub fn stats(&self) -> StatsHandle {
        StatsHandle {
            counters: self.counters.clone(),
        }
    }

    /// Send one frame. A per-frame failure drops the frame and returns `Ok`;
    /// `Err` means the failure threshold was crossed and the link is down.
    pub fn send(&mut self, frame: &AudioFrame) -> Result<(), TransportError> {
        if let Some(sink) = &self.sink {
            sink(frame);
        }

        let result = encode_frame(frame).and_then(|datagram| {
            self.transport.send(&datagram)?;
            Ok(datagram.len())
        });

        match result {
            Ok(len) => {
                self.consecutive_failures = 0;
                self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes_sent
                    .fetch_add(len as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    sequence = frame.sequence,
                    consecutive = self.consecutive_failures,
                    "dropped frame: {}",
                    e
                );
                if self.consecutive_failures >= MAX_SEND_FAILURES {
                    Err(e)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Best-effort flush of drained frames during shutdown, bounded in time
    pub fn flush(&mut self, frames: Vec<AudioFrame>) {
        let deadline = Instant::now() + FLUSH_BUDGET;
        let mut flushed = 0usize;
        for frame in frames {
            if Instant::now() >= deadline {
                tracing::warn!("flush budget exhausted, remaining frames discarded");
                break;
            }
            if self.send(&frame).is_err() {
                break;
            }
            flushed += 1;
        }
        if flushed > 0 {
            tracing::debug!(flushed, "drained frames flushed");
        }
    }
}
