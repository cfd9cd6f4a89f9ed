//! Datagram wire format
//!
//! One frame per datagram:
//!
//! ```text
//! [u32 sequence (BE)] [u16 sample_count (BE)] [sample_count x i16 (BE)]
//! ```
//!
//! No handshake and no retransmission; the receiver infers liveness from
//! datagram arrival and uses the sequence number to detect loss.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::audio::frame::AudioFrame;
use crate::constants::{HEADER_LEN, MAX_FRAME_SAMPLES};
use crate::error::TransportError;

/// A datagram parsed on the receiving side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub sequence: u32,
    pub samples: Vec<i16>,
}

/// Encode a frame into one datagram
pub fn encode_frame(frame: &AudioFrame) -> Result<Bytes, TransportError> {
    let sample_count = frame.samples.len();
    if sample_count > MAX_FRAME_SAMPLES {
        return Err(TransportError::PacketTooLarge(
            HEADER_LEN + sample_count * 2,
        ));
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + sample_count * 2);
    buf.put_u32(frame.sequence);
    buf.put_u16(sample_count as u16);
    for &sample in &frame.samples {
        buf.put_i16(sample);
    }
    Ok(buf.freeze())
}

/// Decode one datagram back into sequence and samples
pub fn decode_frame(datagram: &[u8]) -> Result<DecodedFrame, TransportError> {
    if datagram.len() < HEADER_LEN {
        return Err(TransportError::InvalidPacket);
    }

    let mut buf = datagram;
    let sequence = buf.get_u32();
    let sample_count = buf.get_u16() as usize;

    if buf.remaining() != sample_count * 2 {
        return Err(TransportError::InvalidPacket);
    }

    let mut samples = Vec::with_capacity(sample_count);
    for _ in 0..sample_count {
        samples.push(buf.get_i16());
    }

    Ok(DecodedFrame { sequence, samples })
}

/// Receiver-side loss accounting over the u32 sequence space.
///
/// Sequence numbers wrap, so gaps are computed with wrapping arithmetic:
/// a forward delta within half the space counts as loss, anything beyond
/// that is a late or duplicate packet and is ignored.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    next: Option<u32>,
    lost: u64,
}

/// Forward deltas at or past this are treated as late/reordered arrivals
const REORDER_HORIZON: u32 = u32::MAX / 2;

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an arrival; returns how many frames were skipped before it
    pub fn observe(&mut self, sequence: u32) -> u32 {
        let Some(expected) = self.next else {
            self.next = Some(sequence.wrapping_add(1));
            return 0;
        };

        let delta = sequence.wrapping_sub(expected);
        if delta >= REORDER_HORIZON {
            // Late or duplicate; the expected position does not move back
            return 0;
        }

        self.next = Some(sequence.wrapping_add(1));
        self.lost += delta as u64;
        delta
    }

    /// Total frames counted as lost so far
    pub fn lost(&self) -> u64 {
        self.lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let samples: Vec<i16> = (0..256).map(|i| (i * 37 - 4000) as i16).collect();
        let frame = AudioFrame::new(samples.clone(), 42, 123_456);

        let datagram = encode_frame(&frame).unwrap();
        assert_eq!(datagram.len(), HEADER_LEN + 512);

        let decoded = decode_frame(&datagram).unwrap();
        assert_eq!(decoded.sequence, 42);
        assert_eq!(decoded.samples, samples);
    }

    #[test]
    fn test_header_layout_is_big_endian() {
        let frame = AudioFrame::new(vec![0x0102, -2], 0x0A0B0C0D, 0);
        let datagram = encode_frame(&frame).unwrap();

        assert_eq!(&datagram[..4], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(&datagram[4..6], &[0x00, 0x02]);
        assert_eq!(&datagram[6..8], &[0x01, 0x02]);
        assert_eq!(&datagram[8..10], &[0xFF, 0xFE]);
    }

    #[test]
    fn test_rejects_oversized_frame() {
        let frame = AudioFrame::new(vec![0; MAX_FRAME_SAMPLES + 1], 0, 0);
        assert!(matches!(
            encode_frame(&frame),
            Err(TransportError::PacketTooLarge(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_datagram() {
        let frame = AudioFrame::new(vec![1, 2, 3], 7, 0);
        let datagram = encode_frame(&frame).unwrap();

        assert!(decode_frame(&datagram[..4]).is_err());
        assert!(decode_frame(&datagram[..datagram.len() - 1]).is_err());
    }

    #[test]
    fn test_sequence_tracker_counts_gaps() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.observe(0), 0);
        assert_eq!(tracker.observe(1), 0);
        assert_eq!(tracker.observe(4), 2);
        assert_eq!(tracker.lost(), 2);
    }

    #[test]
    fn test_sequence_tracker_spans_wraparound() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.observe(u32::MAX - 1), 0);
        // MAX was lost; 0 arrives one past the wrap
        assert_eq!(tracker.observe(0), 1);
        assert_eq!(tracker.observe(1), 0);
        assert_eq!(tracker.lost(), 1);
    }

    #[test]
    fn test_sequence_tracker_ignores_late_packets() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(5);
        // An old packet arriving late is not a gap and does not rewind
        assert_eq!(tracker.observe(3), 0);
        assert_eq!(tracker.observe(6), 0);
        assert_eq!(tracker.lost(), 0);
    }

    #[test]
    fn test_empty_payload_is_valid() {
        let frame = AudioFrame::new(Vec::new(), 9, 0);
        let datagram = encode_frame(&frame).unwrap();
        let decoded = decode_frame(&datagram).unwrap();
        assert_eq!(decoded.sequence, 9);
        assert!(decoded.samples.is_empty());
    }
}
