//! # UDP Mic Streamer
//!
//! Low-latency streaming of raw 16-bit mono PCM from a capture device to a
//! UDP receiver, one frame per datagram.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            SENDER                                │
//! │  ┌────────────┐      ┌────────────┐      ┌─────────────────┐    │
//! │  │ Microphone │      │ FrameQueue │      │   Transmitter   │    │
//! │  │  (cpal)    │─────▶│ drop-oldest│─────▶│ [Seq|Count|PCM] │    │
//! │  └────────────┘      └────────────┘      └────────┬────────┘    │
//! │   capture thread                          transmit thread       │
//! │        ▲                                          │             │
//! │        └───────── LifecycleController ────────────┘             │
//! │              Idle→Starting→Running→Stopping→Idle                │
//! └───────────────────────────────────┬──────────────────────────────┘
//!                                     │ UDP (best effort)
//!                                     ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  RECEIVER: decode header, track sequence gaps, consume samples   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Datagrams are best-effort: a dropped packet is a lost 10-40 ms slice of
//! audio and is never retransmitted. When the queue backs up the oldest frame
//! is evicted so delivered audio stays fresh.

pub mod audio;
pub mod config;
pub mod error;
pub mod net;
pub mod session;

pub use config::StreamConfig;
pub use error::{Error, Result};
pub use session::{CaptureState, FailureReason, LifecycleController};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for capture (Hz)
    pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

    /// Default frame queue capacity (frames)
    pub const DEFAULT_QUEUE_CAPACITY: usize = 6;

    /// Default frame length in samples (10 ms at 44.1 kHz)
    pub const DEFAULT_FRAME_SAMPLES: usize = 441;

    /// Datagram header size: u32 sequence + u16 sample count
    pub const HEADER_LEN: usize = 6;

    /// Maximum packet size for UDP (MTU - IP/UDP headers)
    pub const MAX_PACKET_SIZE: usize = 1472;

    /// Maximum samples per datagram within the MTU budget
    pub const MAX_FRAME_SAMPLES: usize = (MAX_PACKET_SIZE - HEADER_LEN) / 2;

    /// Consecutive send failures tolerated before the session fails
    pub const MAX_SEND_FAILURES: u32 = 3;

    /// Bounded wait for worker threads during shutdown
    pub const SHUTDOWN_TIMEOUT_MS: u64 = 2_000;
}
