//! Stream configuration
//!
//! Loaded from a TOML file or built in code; validated before a session
//! starts so misconfiguration fails fast instead of mid-stream.

use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use crate::constants::{
    DEFAULT_FRAME_SAMPLES, DEFAULT_QUEUE_CAPACITY, DEFAULT_SAMPLE_RATE, MAX_FRAME_SAMPLES,
};
use crate::error::{Error, Result};

/// Configuration for one streaming session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Destination host name or IP address
    pub destination_host: String,

    /// Destination UDP port
    pub destination_port: u16,

    /// Frame queue capacity in frames
    pub queue_capacity: usize,

    /// Samples per frame; 0 means use the device-computed minimum
    pub frame_samples: usize,

    /// Input device name; `None` selects the default input device
    pub device_name: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            destination_host: "127.0.0.1".to_string(),
            destination_port: 5000,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            frame_samples: DEFAULT_FRAME_SAMPLES,
            device_name: None,
        }
    }
}

impl StreamConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that all values can actually produce a working stream
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be non-zero".into()));
        }
        if self.destination_port == 0 {
            return Err(Error::Config("destination_port must be non-zero".into()));
        }
        if self.destination_host.is_empty() {
            return Err(Error::Config("destination_host must be set".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }
        if self.frame_samples > MAX_FRAME_SAMPLES {
            return Err(Error::Config(format!(
                "frame_samples {} exceeds datagram budget of {}",
                self.frame_samples, MAX_FRAME_SAMPLES
            )));
        }
        Ok(())
    }

    /// Resolve the destination to a socket address
    pub fn destination(&self) -> Result<SocketAddr> {
        let target = format!("{}:{}", self.destination_host, self.destination_port);
        target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Config(format!("cannot resolve destination {}", target)))
    }
}
