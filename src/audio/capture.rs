//! Audio capture from the input device
//!
//! The cpal stream is callback-driven and must live on its own thread, so
//! `CpalCapture` spawns a dedicated stream thread and bridges the callback
//! into blocking `read_frame` calls through a bounded channel. Device errors
//! arrive on a separate channel and end the read loop; the capture device is
//! released whenever the stream thread exits, on every path.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::audio::frame::AudioFrame;
use crate::config::StreamConfig;
use crate::constants::MAX_FRAME_SAMPLES;
use crate::error::CaptureError;

/// Blocking source of fixed-size PCM frames
pub trait CaptureSource: Send {
    /// Read the next frame, blocking until the device has filled one buffer.
    /// An error means the device is gone and the read loop must stop.
    fn read_frame(&mut self) -> Result<AudioFrame, CaptureError>;
}

/// How long `read_frame` waits for device data before re-checking liveness
const READ_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Sample chunks buffered between the cpal callback and `read_frame`
const CHUNK_CHANNEL_CAPACITY: usize = 32;

/// Capture source backed by a cpal input stream
pub struct CpalCapture {
    running: Arc<AtomicBool>,
    /// Tripped externally to unblock `read_frame` even when the backend
    /// stalls without delivering chunks or a stream error
    stop_flag: Arc<AtomicBool>,
    chunk_rx: Receiver<Vec<i16>>,
    error_rx: Receiver<CaptureError>,
    stream_thread: Option<JoinHandle<()>>,
    /// Samples accumulated towards the next frame
    pending: Vec<i16>,
    frame_samples: usize,
    sequence: u32,
    sample_rate: u32,
    start_time: Instant,
}

impl CpalCapture {
    /// Open the device as a mono 16-bit stream at the configured rate.
    /// Returns once the stream is playing or with the startup error.
    pub fn open(device: cpal::Device, config: &StreamConfig) -> Result<Self, CaptureError> {
        let frame_samples = effective_frame_samples(config);
        let running = Arc::new(AtomicBool::new(true));
        let (chunk_tx, chunk_rx) = bounded::<Vec<i16>>(CHUNK_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = bounded::<CaptureError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), CaptureError>>(1);

        let stream_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let thread_running = running.clone();
        let handle = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                run_stream(
                    device,
                    stream_config,
                    chunk_tx,
                    error_tx,
                    ready_tx,
                    thread_running,
                );
            })
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        // Surface startup errors synchronously to the caller of open()
        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(CaptureError::DeviceUnavailable(
                    "stream thread exited before start".to_string(),
                ));
            }
        }

        tracing::info!(
            sample_rate = config.sample_rate,
            frame_samples,
            "capture stream started"
        );

        Ok(Self {
            running,
            stop_flag: Arc::new(AtomicBool::new(false)),
            chunk_rx,
            error_rx,
            stream_thread: Some(handle),
            pending: Vec::with_capacity(frame_samples * 2),
            frame_samples,
            sequence: 0,
            sample_rate: config.sample_rate,
            start_time: Instant::now(),
        })
    }

    /// Observe an external stop flag so `read_frame` returns promptly on
    /// shutdown instead of waiting for device data that may never come
    pub fn bind_stop_flag(&mut self, flag: Arc<AtomicBool>) {
        self.stop_flag = flag;
    }

    /// Samples per emitted frame
    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Capture sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn next_frame(&mut self) -> AudioFrame {
        let samples: Vec<i16> = self.pending.drain(..self.frame_samples).collect();
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        let timestamp_us = self.start_time.elapsed().as_micros() as u64;
        AudioFrame::new(samples, sequence, timestamp_us)
    }
}

impl CaptureSource for CpalCapture {
    fn read_frame(&mut self) -> Result<AudioFrame, CaptureError> {
        loop {
            if self.stop_flag.load(Ordering::Relaxed) {
                return Err(CaptureError::DeviceUnavailable(
                    "capture stopped".to_string(),
                ));
            }
            if let Ok(err) = self.error_rx.try_recv() {
                return Err(err);
            }
            if self.pending.len() >= self.frame_samples {
                return Ok(self.next_frame());
            }

            match self.chunk_rx.recv_timeout(READ_POLL_INTERVAL) {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CaptureError::DeviceUnavailable(
                        "capture stream ended".to_string(),
                    ));
                }
            }
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.stream_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Stream thread body: build the stream, report readiness, park until stopped.
/// The stream is dropped when this returns, releasing the device.
fn run_stream(
    device: cpal::Device,
    config: cpal::StreamConfig,
    chunk_tx: Sender<Vec<i16>>,
    error_tx: Sender<CaptureError>,
    ready_tx: Sender<Result<(), CaptureError>>,
    running: Arc<AtomicBool>,
) {
    let sample_format = match device.default_input_config() {
        Ok(supported) => supported.sample_format(),
        Err(e) => {
            let _ = ready_tx.send(Err(map_config_error(e)));
            return;
        }
    };

    let stream_error_tx = error_tx.clone();
    let on_error = move |err: cpal::StreamError| {
        let _ = stream_error_tx.try_send(map_stream_error(err));
    };

    let stream = match sample_format {
        cpal::SampleFormat::I16 => {
            let tx = chunk_tx.clone();
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    // A full channel means the reader stalled; drop the chunk
                    let _ = tx.try_send(data.to_vec());
                },
                on_error,
                None,
            )
        }
        cpal::SampleFormat::F32 => {
            let tx = chunk_tx.clone();
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let converted: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();
                    let _ = tx.try_send(converted);
                },
                on_error,
                None,
            )
        }
        other => {
            let _ = ready_tx.send(Err(CaptureError::InvalidConfiguration(format!(
                "unsupported sample format: {:?}",
                other
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(map_build_error(e)));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(match e {
            cpal::PlayStreamError::DeviceNotAvailable => {
                CaptureError::DeviceUnavailable("device not available".to_string())
            }
            cpal::PlayStreamError::BackendSpecific { err } => map_backend_message(&err.description),
        }));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(10));
    }
    // Stream dropped here, capture stops and the device is released
}

fn map_build_error(err: cpal::BuildStreamError) -> CaptureError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable("device not available".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported => {
            CaptureError::InvalidConfiguration("stream config not supported".to_string())
        }
        cpal::BuildStreamError::InvalidArgument => {
            CaptureError::InvalidConfiguration("invalid stream argument".to_string())
        }
        cpal::BuildStreamError::BackendSpecific { err } => map_backend_message(&err.description),
        other => CaptureError::DeviceUnavailable(other.to_string()),
    }
}

fn map_config_error(err: cpal::DefaultStreamConfigError) -> CaptureError {
    match err {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable("device not available".to_string())
        }
        cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
            CaptureError::InvalidConfiguration("input streams not supported".to_string())
        }
        cpal::DefaultStreamConfigError::BackendSpecific { err } => {
            map_backend_message(&err.description)
        }
    }
}

fn map_stream_error(err: cpal::StreamError) -> CaptureError {
    match err {
        cpal::StreamError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable("device disconnected".to_string())
        }
        cpal::StreamError::BackendSpecific { err } => map_backend_message(&err.description),
    }
}

/// Backends report permission problems only through free-form messages
fn map_backend_message(description: &str) -> CaptureError {
    let lowered = description.to_lowercase();
    if lowered.contains("permission") || lowered.contains("denied") {
        CaptureError::PermissionDenied
    } else {
        CaptureError::DeviceUnavailable(description.to_string())
    }
}

/// Resolve the configured frame length; 0 means 10 ms at the sample rate,
/// always clamped to what fits in one datagram.
fn effective_frame_samples(config: &StreamConfig) -> usize {
    let requested = if config.frame_samples == 0 {
        (config.sample_rate / 100) as usize
    } else {
        config.frame_samples
    };
    requested.clamp(1, MAX_FRAME_SAMPLES)
}
