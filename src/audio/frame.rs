//! PCM audio frames

/// One fixed-size block of consecutively captured mono PCM samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// 16-bit signed samples
    pub samples: Vec<i16>,
    /// Monotonically increasing frame sequence number
    pub sequence: u32,
    /// Capture timestamp in microseconds since session start
    pub timestamp_us: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sequence: u32, timestamp_us: u64) -> Self {
        Self {
            samples,
            sequence,
            timestamp_us,
        }
    }

    /// Get frame duration in microseconds
    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        (self.samples.len() as u64 * 1_000_000) / sample_rate as u64
    }
}
