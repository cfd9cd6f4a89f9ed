//! Network subsystem for UDP audio transport

pub mod packet;
pub mod transmitter;

pub use packet::{decode_frame, encode_frame, DecodedFrame, SequenceTracker};
pub use transmitter::{DatagramTransport, FrameSink, Transmitter, UdpTransport};
