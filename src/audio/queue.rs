//! Bounded frame queue between capture and transmit
//!
//! Single producer (capture thread), single consumer (transmit thread).
//! The producer never blocks: when the queue is full the oldest frame is
//! evicted, because stale audio is worse than a small gap. Eviction keeps
//! FIFO order among surviving frames, so delivered sequence numbers are
//! strictly increasing with gaps where frames were dropped.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::audio::frame::AudioFrame;

struct Inner {
    frames: VecDeque<AudioFrame>,
    closed: bool,
}

/// Bounded drop-oldest SPSC queue of audio frames
pub struct FrameQueue {
    inner: Mutex<Inner>,
    available: Condvar,
    capacity: usize,
    overflow_count: AtomicUsize,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be at least 1");
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
            overflow_count: AtomicUsize::new(0),
        }
    }

    /// Push a frame, evicting the oldest one if the queue is full.
    /// Never blocks the producer.
    pub fn push(&self, frame: AudioFrame) {
        let mut inner = self.inner.lock();
        if inner.frames.len() == self.capacity {
            let evicted = inner.frames.pop_front();
            let count = self.overflow_count.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(old) = evicted {
                tracing::debug!(
                    sequence = old.sequence,
                    overflows = count,
                    "queue full, evicted oldest frame"
                );
            }
        }
        inner.frames.push_back(frame);
        drop(inner);
        self.available.notify_one();
    }

    /// Pop the next frame, blocking until one is available.
    /// Returns `None` promptly once the queue has been closed.
    pub fn pop(&self) -> Option<AudioFrame> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(frame) = inner.frames.pop_front() {
                return Some(frame);
            }
            self.available.wait(&mut inner);
        }
    }

    /// Pop without blocking
    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.inner.lock().frames.pop_front()
    }

    /// Close the queue, waking any blocked consumer. Frames still queued
    /// remain available to `drain` for the shutdown flush.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }

    /// Take all remaining frames; used only during shutdown
    pub fn drain(&self) -> Vec<AudioFrame> {
        self.inner.lock().frames.drain(..).collect()
    }

    /// Get current queue length
    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().frames.is_empty()
    }

    /// Get queue capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of frames evicted due to overflow
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }
}
