//! Session lifecycle control
//!
//! One capture session at a time. `start` opens the device and the transport,
//! then launches two worker threads joined by the frame queue: the capture
//! loop blocks on device reads and pushes frames, the transmit loop blocks on
//! queue pops and sends datagrams. `stop` cancels both cooperatively, waits a
//! bounded time, flushes what is left in the queue, and releases everything.
//!
//! Runtime failures (device revoked, transport repeatedly down) move the
//! state machine to `Failed(reason)`; hosts observe transitions through the
//! subscription channel. The process never crashes on a failed session.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::audio::capture::{CaptureSource, CpalCapture};
use crate::audio::device::{default_input_device, input_device_by_name};
use crate::audio::queue::FrameQueue;
use crate::config::StreamConfig;
use crate::constants::SHUTDOWN_TIMEOUT_MS;
use crate::error::{CaptureError, SessionError};
use crate::net::transmitter::{DatagramTransport, FrameSink, StatsHandle, Transmitter, UdpTransport};

/// Why a session moved to `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    PermissionDenied,
    DeviceUnavailable,
    TransportDown,
}

/// Lifecycle state of the single capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Starting,
    Running,
    Stopping,
    Failed(FailureReason),
}

/// State shared between the controller and its worker threads
struct Shared {
    state: Mutex<CaptureState>,
    listeners: Mutex<Vec<Sender<CaptureState>>>,
    cancelled: Arc<AtomicBool>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(CaptureState::Idle),
            listeners: Mutex::new(Vec::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag handed to capture sources so their blocking reads unblock on stop
    fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    fn state(&self) -> CaptureState {
        *self.state.lock()
    }

    fn set_state(&self, new: CaptureState) {
        let mut state = self.state.lock();
        if *state == new {
            return;
        }
        tracing::info!(from = ?*state, to = ?new, "session state change");
        *state = new;
        drop(state);

        // Drop listeners whose receiver side is gone
        self.listeners
            .lock()
            .retain(|listener| listener.send(new).is_ok());
    }

    fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Starting -> Running, unless a worker already failed the session
    /// between spawn and this call
    fn finish_start(&self) {
        let mut state = self.state.lock();
        if *state != CaptureState::Starting {
            return;
        }
        tracing::info!(from = ?*state, to = ?CaptureState::Running, "session state change");
        *state = CaptureState::Running;
        drop(state);

        self.listeners
            .lock()
            .retain(|listener| listener.send(CaptureState::Running).is_ok());
    }

    /// Move to `Failed` unless the session is already winding down
    fn fail(&self, reason: FailureReason) {
        let mut state = self.state.lock();
        match *state {
            CaptureState::Stopping | CaptureState::Idle => return,
            _ => {}
        }
        tracing::warn!(from = ?*state, ?reason, "session failed");
        *state = CaptureState::Failed(reason);
        drop(state);

        self.cancelled.store(true, Ordering::SeqCst);
        self.listeners
            .lock()
            .retain(|listener| listener.send(CaptureState::Failed(reason)).is_ok());
    }
}

/// Handles for one running session
struct ActiveSession {
    queue: Arc<FrameQueue>,
    capture_thread: JoinHandle<()>,
    transmit_thread: JoinHandle<Transmitter>,
    capture_done: Receiver<()>,
    transmit_done: Receiver<()>,
}

/// Owns start/stop transitions and supervises the two worker loops
pub struct LifecycleController {
    shared: Arc<Shared>,
    session: Mutex<Option<ActiveSession>>,
    stats: Mutex<Option<StatsHandle>>,
}

impl LifecycleController {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            session: Mutex::new(None),
            stats: Mutex::new(None),
        }
    }

    /// Current state snapshot
    pub fn state(&self) -> CaptureState {
        self.shared.state()
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> Receiver<CaptureState> {
        let (tx, rx) = unbounded();
        self.shared.listeners.lock().push(tx);
        rx
    }

    /// Transmitter stats for the current or most recent session
    pub fn transmitter_stats(&self) -> Option<StatsHandle> {
        self.stats.lock().clone()
    }

    /// Start streaming from the default input device to the configured
    /// destination. Returns once the device and socket are open; streaming
    /// continues on the worker threads.
    pub fn start(&self, config: &StreamConfig, sink: Option<FrameSink>) -> Result<(), SessionError> {
        let mut session = self.session.lock();
        self.ensure_startable(&mut session)?;
        self.shared.set_state(CaptureState::Starting);

        if let Err(e) = config.validate() {
            // Misconfiguration is caller error, not a device fault
            self.shared.set_state(CaptureState::Idle);
            return Err(SessionError::Capture(CaptureError::InvalidConfiguration(
                e.to_string(),
            )));
        }

        let device = match &config.device_name {
            Some(name) => input_device_by_name(name),
            None => default_input_device(),
        };
        let mut capture = device
            .and_then(|device| CpalCapture::open(device, config))
            .map_err(|e| {
                self.shared.fail(capture_failure_reason(&e));
                SessionError::Capture(e)
            })?;
        capture.bind_stop_flag(self.shared.cancel_flag());

        let destination = config.destination().map_err(|e| {
            self.shared.set_state(CaptureState::Idle);
            SessionError::Capture(CaptureError::InvalidConfiguration(e.to_string()))
        })?;

        // Capture is dropped (device released) if the socket fails to open
        let transport = UdpTransport::open(destination).map_err(|e| {
            self.shared.fail(FailureReason::TransportDown);
            SessionError::Transport(e)
        })?;

        let launched = self.launch(config, Box::new(capture), Box::new(transport), sink);
        self.complete_start(&mut session, launched)
    }

    /// Start with injected capture and transport; used by hosts that manage
    /// their own devices and by tests.
    pub fn start_with(
        &self,
        config: &StreamConfig,
        capture: Box<dyn CaptureSource>,
        transport: Box<dyn DatagramTransport>,
        sink: Option<FrameSink>,
    ) -> Result<(), SessionError> {
        let mut session = self.session.lock();
        self.ensure_startable(&mut session)?;
        self.shared.set_state(CaptureState::Starting);

        if let Err(e) = config.validate() {
            self.shared.set_state(CaptureState::Idle);
            return Err(SessionError::Capture(CaptureError::InvalidConfiguration(
                e.to_string(),
            )));
        }

        let launched = self.launch(config, capture, transport, sink);
        self.complete_start(&mut session, launched)
    }

    /// Commit a launched session, or roll the state machine out of
    /// `Starting` on failure so the controller never wedges: a stuck
    /// `Starting` state would reject every later start as `AlreadyRunning`
    /// while `stop()` finds nothing to tear down.
    fn complete_start(
        &self,
        session: &mut Option<ActiveSession>,
        launched: Result<ActiveSession, SessionError>,
    ) -> Result<(), SessionError> {
        match launched {
            Ok(active) => {
                *session = Some(active);
                self.shared.finish_start();
                Ok(())
            }
            Err(e) => {
                self.shared.fail(startup_failure_reason(&e));
                Err(e)
            }
        }
    }

    /// Stop the session: cancel both loops, wait bounded, flush the queue,
    /// release device and socket. No-op when nothing is running.
    pub fn stop(&self) -> Result<(), SessionError> {
        let mut session = self.session.lock();
        let Some(active) = session.take() else {
            return Ok(());
        };
        self.shutdown_session(active)
    }

    fn shutdown_session(&self, active: ActiveSession) -> Result<(), SessionError> {
        self.shared.set_state(CaptureState::Stopping);
        self.shared.cancelled.store(true, Ordering::SeqCst);
        active.queue.close();

        let deadline = Instant::now() + Duration::from_millis(SHUTDOWN_TIMEOUT_MS);
        let capture_stopped = wait_done(&active.capture_done, deadline);
        let transmit_stopped = wait_done(&active.transmit_done, deadline);

        let mut timed_out = false;
        if capture_stopped {
            let _ = active.capture_thread.join();
        } else {
            tracing::warn!("capture loop missed the shutdown deadline, detaching");
            timed_out = true;
        }

        if transmit_stopped {
            if let Ok(mut transmitter) = active.transmit_thread.join() {
                transmitter.flush(active.queue.drain());
            }
        } else {
            tracing::warn!("transmit loop missed the shutdown deadline, detaching");
            timed_out = true;
        }

        self.shared.set_state(CaptureState::Idle);

        if timed_out {
            Err(SessionError::ShutdownTimeout)
        } else {
            Ok(())
        }
    }

    /// Reject start unless Idle or Failed; a failed session's leftover
    /// workers are torn down first so restart does not need an explicit stop
    fn ensure_startable(&self, session: &mut Option<ActiveSession>) -> Result<(), SessionError> {
        match self.shared.state() {
            CaptureState::Idle => Ok(()),
            CaptureState::Failed(_) => {
                if let Some(active) = session.take() {
                    let _ = self.shutdown_session(active);
                }
                Ok(())
            }
            _ => Err(SessionError::AlreadyRunning),
        }
    }

    fn launch(
        &self,
        config: &StreamConfig,
        mut capture: Box<dyn CaptureSource>,
        transport: Box<dyn DatagramTransport>,
        sink: Option<FrameSink>,
    ) -> Result<ActiveSession, SessionError> {
        self.shared.cancelled.store(false, Ordering::SeqCst);
        let queue = Arc::new(FrameQueue::new(config.queue_capacity));

        let mut transmitter = Transmitter::new(transport, sink);
        *self.stats.lock() = Some(transmitter.stats());

        let (capture_done_tx, capture_done) = bounded::<()>(1);
        let (transmit_done_tx, transmit_done) = bounded::<()>(1);

        let capture_shared = self.shared.clone();
        let capture_queue = queue.clone();
        let capture_thread = std::thread::Builder::new()
            .name("capture-loop".to_string())
            .spawn(move || {
                capture_loop(capture.as_mut(), &capture_queue, &capture_shared);
                let _ = capture_done_tx.send(());
            })
            .map_err(|e| SessionError::Capture(CaptureError::DeviceUnavailable(e.to_string())))?;

        let transmit_shared = self.shared.clone();
        let transmit_queue = queue.clone();
        let spawned = std::thread::Builder::new()
            .name("transmit-loop".to_string())
            .spawn(move || {
                transmit_loop(&mut transmitter, &transmit_queue, &transmit_shared);
                let _ = transmit_done_tx.send(());
                transmitter
            });
        let transmit_thread = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                // Roll back the capture worker if the second spawn fails
                self.shared.cancelled.store(true, Ordering::SeqCst);
                queue.close();
                let _ = capture_thread.join();
                return Err(SessionError::Transport(
                    crate::error::TransportError::SendFailed(e.to_string()),
                ));
            }
        };

        Ok(ActiveSession {
            queue,
            capture_thread,
            transmit_thread,
            capture_done,
            transmit_done,
        })
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn capture_failure_reason(err: &CaptureError) -> FailureReason {
    match err {
        CaptureError::PermissionDenied => FailureReason::PermissionDenied,
        _ => FailureReason::DeviceUnavailable,
    }
}

fn startup_failure_reason(err: &SessionError) -> FailureReason {
    match err {
        SessionError::Capture(e) => capture_failure_reason(e),
        _ => FailureReason::TransportDown,
    }
}

fn wait_done(done: &Receiver<()>, deadline: Instant) -> bool {
    let remaining = deadline.saturating_duration_since(Instant::now());
    done.recv_timeout(remaining).is_ok()
}

/// Capture worker: block on device reads, push frames until cancelled.
/// A read error ends the session; device failures mid-stream mean the OS
/// revoked the device, so retrying would only spin.
fn capture_loop(capture: &mut dyn CaptureSource, queue: &FrameQueue, shared: &Shared) {
    loop {
        if shared.cancelled() {
            break;
        }
        match capture.read_frame() {
            Ok(frame) => queue.push(frame),
            Err(e) => {
                if !shared.cancelled() {
                    tracing::error!("capture read failed: {}", e);
                    shared.fail(capture_failure_reason(&e));
                }
                queue.close();
                break;
            }
        }
    }
    tracing::debug!("capture loop exited");
}

/// Transmit worker: pop until the queue closes, send one datagram per frame
fn transmit_loop(transmitter: &mut Transmitter, queue: &FrameQueue, shared: &Shared) {
    while let Some(frame) = queue.pop() {
        if let Err(e) = transmitter.send(&frame) {
            tracing::error!("transport down: {}", e);
            shared.fail(FailureReason::TransportDown);
            break;
        }
    }
    tracing::debug!("transmit loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::AudioFrame;
    use crate::error::TransportError;
    use crate::net::transmitter::tests::RecordingTransport;
    use std::collections::VecDeque;

    /// Capture mock: yields scripted frames at a fixed pace, then either
    /// fails or keeps producing silence.
    struct ScriptedCapture {
        frames: VecDeque<AudioFrame>,
        pace: Duration,
        next_sequence: u32,
        after_script: AfterScript,
    }

    enum AfterScript {
        Silence,
        Fail(CaptureError),
    }

    impl ScriptedCapture {
        fn silence(pace: Duration) -> Self {
            Self {
                frames: VecDeque::new(),
                pace,
                next_sequence: 0,
                after_script: AfterScript::Silence,
            }
        }

        fn failing_after(frames: Vec<AudioFrame>, err: CaptureError) -> Self {
            Self {
                frames: frames.into(),
                pace: Duration::from_millis(1),
                next_sequence: 0,
                after_script: AfterScript::Fail(err),
            }
        }
    }

    impl CaptureSource for ScriptedCapture {
        fn read_frame(&mut self) -> Result<AudioFrame, CaptureError> {
            std::thread::sleep(self.pace);
            if let Some(frame) = self.frames.pop_front() {
                self.next_sequence = frame.sequence.wrapping_add(1);
                return Ok(frame);
            }
            match &self.after_script {
                AfterScript::Fail(err) => Err(err.clone()),
                AfterScript::Silence => {
                    let seq = self.next_sequence;
                    self.next_sequence = self.next_sequence.wrapping_add(1);
                    Ok(AudioFrame::new(vec![0; 64], seq, seq as u64 * 10_000))
                }
            }
        }
    }

    /// Transport mock that always reports an unreachable host
    struct DeadTransport;

    impl DatagramTransport for DeadTransport {
        fn send(&mut self, _datagram: &[u8]) -> Result<(), TransportError> {
            Err(TransportError::SendFailed("unreachable".to_string()))
        }
    }

    fn test_config() -> StreamConfig {
        StreamConfig {
            destination_port: 9999,
            queue_capacity: 4,
            ..Default::default()
        }
    }

    fn recording_transport() -> (Box<dyn DatagramTransport>, Arc<Mutex<Vec<Vec<u8>>>>) {
        let datagrams = Arc::new(Mutex::new(Vec::new()));
        let transport = RecordingTransport {
            datagrams: datagrams.clone(),
        };
        (Box::new(transport), datagrams)
    }

    fn wait_for_failure(rx: &Receiver<CaptureState>) -> FailureReason {
        let deadline = Duration::from_secs(2);
        loop {
            match rx.recv_timeout(deadline) {
                Ok(CaptureState::Failed(reason)) => return reason,
                Ok(_) => continue,
                Err(e) => panic!("no failure observed: {}", e),
            }
        }
    }

    #[test]
    fn test_stop_while_idle_is_noop() {
        let controller = LifecycleController::new();
        assert_eq!(controller.state(), CaptureState::Idle);
        assert!(controller.stop().is_ok());
        assert_eq!(controller.state(), CaptureState::Idle);
    }

    #[test]
    fn test_second_start_rejected() {
        let controller = LifecycleController::new();
        let capture = ScriptedCapture::silence(Duration::from_millis(5));
        let (transport, _) = recording_transport();

        controller
            .start_with(&test_config(), Box::new(capture), transport, None)
            .unwrap();
        assert_eq!(controller.state(), CaptureState::Running);

        let capture2 = ScriptedCapture::silence(Duration::from_millis(5));
        let (transport2, _) = recording_transport();
        let second = controller.start_with(&test_config(), Box::new(capture2), transport2, None);
        assert!(matches!(second, Err(SessionError::AlreadyRunning)));
        // First session untouched
        assert_eq!(controller.state(), CaptureState::Running);

        controller.stop().unwrap();
        assert_eq!(controller.state(), CaptureState::Idle);
    }

    #[test]
    fn test_device_failure_fails_session_and_stop_completes() {
        let controller = LifecycleController::new();
        let events = controller.subscribe();

        let frames = vec![
            AudioFrame::new(vec![0; 64], 0, 0),
            AudioFrame::new(vec![0; 64], 1, 10_000),
        ];
        let capture = ScriptedCapture::failing_after(
            frames,
            CaptureError::DeviceUnavailable("revoked".to_string()),
        );
        let (transport, _) = recording_transport();

        controller
            .start_with(&test_config(), Box::new(capture), transport, None)
            .unwrap();

        assert_eq!(wait_for_failure(&events), FailureReason::DeviceUnavailable);

        let started = Instant::now();
        controller.stop().unwrap();
        assert!(started.elapsed() < Duration::from_millis(SHUTDOWN_TIMEOUT_MS));
        assert_eq!(controller.state(), CaptureState::Idle);
    }

    #[test]
    fn test_transport_down_fails_session() {
        let controller = LifecycleController::new();
        let events = controller.subscribe();

        let capture = ScriptedCapture::silence(Duration::from_millis(1));
        controller
            .start_with(&test_config(), Box::new(capture), Box::new(DeadTransport), None)
            .unwrap();

        assert_eq!(wait_for_failure(&events), FailureReason::TransportDown);
        controller.stop().unwrap();
    }

    #[test]
    fn test_restart_after_failure() {
        let controller = LifecycleController::new();
        let events = controller.subscribe();

        let capture = ScriptedCapture::failing_after(
            Vec::new(),
            CaptureError::DeviceUnavailable("gone".to_string()),
        );
        let (transport, _) = recording_transport();
        controller
            .start_with(&test_config(), Box::new(capture), transport, None)
            .unwrap();
        wait_for_failure(&events);
        controller.stop().unwrap();

        // Failed sessions can be restarted after stop
        let capture = ScriptedCapture::silence(Duration::from_millis(5));
        let (transport, _) = recording_transport();
        controller
            .start_with(&test_config(), Box::new(capture), transport, None)
            .unwrap();
        assert_eq!(controller.state(), CaptureState::Running);
        controller.stop().unwrap();
    }

    #[test]
    fn test_pipeline_delivers_all_frames() {
        // Ten scripted frames through capture loop, queue, and transmit loop
        let controller = LifecycleController::new();
        let frames: Vec<AudioFrame> = (0..10u32)
            .map(|seq| {
                let samples: Vec<i16> = (0..256).map(|i| (i + seq as i32) as i16).collect();
                AudioFrame::new(samples, seq, seq as u64 * 10_000)
            })
            .collect();
        // Paced slower than the transmit loop drains, so nothing is evicted
        let mut capture = ScriptedCapture::silence(Duration::from_millis(2));
        capture.frames = frames.into();
        capture.after_script = AfterScript::Fail(CaptureError::DeviceUnavailable(
            "script exhausted".to_string(),
        ));

        let (transport, datagrams) = recording_transport();
        let events = controller.subscribe();
        controller
            .start_with(&test_config(), Box::new(capture), transport, None)
            .unwrap();
        wait_for_failure(&events);
        controller.stop().unwrap();

        let sent = datagrams.lock();
        assert_eq!(sent.len(), 10);
        for (i, datagram) in sent.iter().enumerate() {
            let decoded = crate::net::packet::decode_frame(datagram).unwrap();
            assert_eq!(decoded.sequence, i as u32);
            assert_eq!(decoded.samples.len(), 256);
        }
    }

    #[test]
    fn test_launch_failure_does_not_wedge_controller() {
        // A failure between Starting and Running (e.g. worker spawn error)
        // must leave the state machine restartable, not stuck in Starting
        let controller = LifecycleController::new();
        controller.shared.set_state(CaptureState::Starting);

        let spawn_error = Err(SessionError::Capture(CaptureError::DeviceUnavailable(
            "cannot spawn worker".to_string(),
        )));
        let mut session = controller.session.lock();
        let result = controller.complete_start(&mut session, spawn_error);
        drop(session);

        assert!(result.is_err());
        assert_eq!(
            controller.state(),
            CaptureState::Failed(FailureReason::DeviceUnavailable)
        );
        assert!(controller.stop().is_ok());

        // Controller recovers: a later start succeeds
        let capture = ScriptedCapture::silence(Duration::from_millis(5));
        let (transport, _) = recording_transport();
        controller
            .start_with(&test_config(), Box::new(capture), transport, None)
            .unwrap();
        assert_eq!(controller.state(), CaptureState::Running);
        controller.stop().unwrap();
    }

    #[test]
    fn test_invalid_config_leaves_idle() {
        let controller = LifecycleController::new();
        let capture = ScriptedCapture::silence(Duration::from_millis(5));
        let (transport, _) = recording_transport();

        let config = StreamConfig {
            destination_port: 0,
            ..Default::default()
        };
        let result = controller.start_with(&config, Box::new(capture), transport, None);
        assert!(result.is_err());
        assert_eq!(controller.state(), CaptureState::Idle);
    }

    #[test]
    fn test_sink_sees_frames_on_transmit_path() {
        use std::sync::atomic::AtomicUsize;

        let controller = LifecycleController::new();
        let mut capture = ScriptedCapture::silence(Duration::from_millis(2));
        capture.frames = (0..5u32)
            .map(|seq| AudioFrame::new(vec![0; 64], seq, 0))
            .collect();
        capture.after_script =
            AfterScript::Fail(CaptureError::DeviceUnavailable("done".to_string()));

        let seen = Arc::new(AtomicUsize::new(0));
        let sink_seen = seen.clone();
        let sink: FrameSink = Box::new(move |_| {
            sink_seen.fetch_add(1, Ordering::SeqCst);
        });

        let (transport, _) = recording_transport();
        let events = controller.subscribe();
        controller
            .start_with(&test_config(), Box::new(capture), transport, Some(sink))
            .unwrap();
        wait_for_failure(&events);
        controller.stop().unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }
}
