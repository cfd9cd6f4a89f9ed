//! Audio subsystem module

pub mod capture;
pub mod device;
pub mod frame;
pub mod queue;

pub use capture::{CaptureSource, CpalCapture};
pub use frame::AudioFrame;
pub use queue::FrameQueue;
