//! Conversational turn-taking state machine.
//!
//! A control thread owns the capture backend and reconciles it against two
//! live external signals: "may record" and "suspend" (the agent is speaking
//! or a reply is pending). Each recording cycle gets a fresh generation
//! number; transcript and failure events from older generations are
//! discarded. Failures never end the conversation, they surface as status
//! and the loop returns to recording after a short holdoff.

use crate::error::EngineError;
use crate::transport::EngineEvent;
use crossbeam_channel::{select, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long flush waits for an in-flight transcript.
const FLUSH_WAIT: Duration = Duration::from_secs(1);

/// One extra late window when nothing arrived inside the flush wait.
const FLUSH_LATE_GRACE: Duration = Duration::from_millis(150);

/// Pause before the next automatic start after a failure, so a dead device
/// or endpoint cannot hot-loop the turn cycle.
const FAILURE_HOLDOFF: Duration = Duration::from_secs(1);

const IDLE_TICK: Duration = Duration::from_secs(3_600);

/// What happens to each utterance transcript.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum TurnMode {
    /// Submit every transcript immediately.
    AutoSend,
    /// Accumulate transcripts until an explicit flush.
    Buffered,
}

/// One microphone-plus-transport cycle, driven by the controller.
///
/// `start` opens a recording session under the given generation; `stop` is
/// always safe, even when nothing is running. The production implementation
/// is [`crate::session::RecordingSession`].
pub trait CaptureBackend: Send {
    fn start(&mut self, generation: u64) -> Result<(), EngineError>;
    fn stop(&mut self);
}

/// Initial state for [`TurnController::spawn`].
#[derive(Clone, Copy, Debug)]
pub struct TurnOptions {
    pub mode: TurnMode,
    pub may_record: bool,
    pub suspended: bool,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            mode: TurnMode::AutoSend,
            may_record: false,
            suspended: false,
        }
    }
}

enum Command {
    MayRecord(bool),
    Suspend(bool),
    Mode(TurnMode),
    Flush,
    Shutdown,
}

/// Handle to the control thread. All methods post and return immediately;
/// the thread serializes their effects.
pub struct TurnController {
    commands: Sender<Command>,
    flushing: Arc<AtomicBool>,
    recording: Arc<AtomicBool>,
    pending_empty: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TurnController {
    /// Start the control thread. Transcripts and failures arrive on
    /// `events`, submissions leave on `submissions`, transient failures are
    /// forwarded on `status`.
    pub fn spawn(
        backend: Box<dyn CaptureBackend>,
        events: Receiver<EngineEvent>,
        submissions: Sender<String>,
        status: Sender<EngineError>,
        options: TurnOptions,
    ) -> Self {
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
        let flushing = Arc::new(AtomicBool::new(false));
        let recording = Arc::new(AtomicBool::new(false));
        let pending_empty = Arc::new(AtomicBool::new(true));
        let control = ControlLoop {
            backend,
            submissions,
            status,
            mode: options.mode,
            may_record: options.may_record,
            suspended: options.suspended,
            generation: 0,
            recording: false,
            pending: String::new(),
            hold_until: None,
            flushing: Arc::clone(&flushing),
            recording_flag: Arc::clone(&recording),
            pending_empty: Arc::clone(&pending_empty),
        };
        let thread = std::thread::Builder::new()
            .name("voicepipe-turn".to_string())
            .spawn(move || control.run(commands_rx, events))
            .ok();
        Self {
            commands: commands_tx,
            flushing,
            recording,
            pending_empty,
            thread,
        }
    }

    pub fn set_may_record(&self, on: bool) {
        let _ = self.commands.send(Command::MayRecord(on));
    }

    pub fn set_suspended(&self, on: bool) {
        let _ = self.commands.send(Command::Suspend(on));
    }

    pub fn set_mode(&self, mode: TurnMode) {
        let _ = self.commands.send(Command::Mode(mode));
    }

    /// Request a flush. A flush already in progress makes this a no-op.
    pub fn flush(&self) {
        if self.flushing.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.commands.send(Command::Flush).is_err() {
            self.flushing.store(false, Ordering::Release);
        }
    }

    /// True while a flush is in progress, or when there is nothing buffered
    /// and nothing currently recording.
    pub fn send_disabled(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
            || (self.pending_empty.load(Ordering::Acquire)
                && !self.recording.load(Ordering::Acquire))
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Stop the control thread and wait for it to exit. Dropping the
    /// controller does the same.
    pub fn shutdown(self) {}
}

impl Drop for TurnController {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct ControlLoop {
    backend: Box<dyn CaptureBackend>,
    submissions: Sender<String>,
    status: Sender<EngineError>,
    mode: TurnMode,
    may_record: bool,
    suspended: bool,
    generation: u64,
    recording: bool,
    pending: String,
    hold_until: Option<Instant>,
    flushing: Arc<AtomicBool>,
    recording_flag: Arc<AtomicBool>,
    pending_empty: Arc<AtomicBool>,
}

impl ControlLoop {
    fn run(mut self, commands: Receiver<Command>, events: Receiver<EngineEvent>) {
        self.reconcile();
        loop {
            let timeout = self
                .hold_until
                .map(|at| at.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_TICK);
            select! {
                recv(commands) -> command => match command {
                    Ok(Command::MayRecord(on)) => {
                        self.may_record = on;
                        self.reconcile();
                    }
                    Ok(Command::Suspend(on)) => {
                        self.suspended = on;
                        self.reconcile();
                    }
                    Ok(Command::Mode(mode)) => {
                        self.mode = mode;
                        self.reconcile();
                    }
                    Ok(Command::Flush) => self.flush(&events),
                    Ok(Command::Shutdown) | Err(_) => break,
                },
                recv(events) -> event => match event {
                    Ok(event) => self.handle_event(event),
                    Err(_) => break,
                },
                default(timeout) => {
                    if self.hold_until.is_some_and(|at| Instant::now() >= at) {
                        self.hold_until = None;
                        self.reconcile();
                    }
                }
            }
        }
        self.stop_engine();
    }

    /// Bring the engine in line with the external signals. Stop always
    /// completes before the next start, so two sessions never hold the
    /// device at once.
    fn reconcile(&mut self) {
        let desired = self.may_record && !self.suspended;
        if desired && !self.recording {
            if self.hold_until.is_some() {
                return;
            }
            self.start_engine();
        } else if !desired && self.recording {
            self.stop_engine();
        }
    }

    fn start_engine(&mut self) {
        self.generation += 1;
        match self.backend.start(self.generation) {
            Ok(()) => {
                debug!(generation = self.generation, "recording");
                self.recording = true;
                self.recording_flag.store(true, Ordering::Release);
            }
            Err(error) => {
                warn!(%error, "failed to start recording");
                let _ = self.status.send(error);
                self.hold_until = Some(Instant::now() + FAILURE_HOLDOFF);
            }
        }
    }

    fn stop_engine(&mut self) {
        if self.recording {
            self.recording = false;
            self.recording_flag.store(false, Ordering::Release);
            self.backend.stop();
        }
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Transcript { generation, text } => {
                if generation != self.generation {
                    debug!(
                        generation,
                        current = self.generation,
                        "discarding stale transcript"
                    );
                    return;
                }
                self.finish_turn(&text);
            }
            EngineEvent::Failed { generation, error } => {
                if generation != self.generation {
                    debug!(generation, current = self.generation, "discarding stale failure");
                    return;
                }
                warn!(generation, %error, "turn failed");
                let _ = self.status.send(error.into());
                self.stop_engine();
                self.hold_until = Some(Instant::now() + FAILURE_HOLDOFF);
            }
        }
    }

    /// A transcript for the current generation ends the turn: route the
    /// text by mode, then begin the next cycle unless suspended.
    fn finish_turn(&mut self, text: &str) {
        self.stop_engine();
        let text = text.trim();
        if !text.is_empty() {
            match self.mode {
                TurnMode::AutoSend => self.submit(text.to_string()),
                TurnMode::Buffered => self.append_pending(text),
            }
        }
        self.reconcile();
    }

    fn append_pending(&mut self, text: &str) {
        if !self.pending.is_empty() {
            self.pending.push(' ');
        }
        self.pending.push_str(text);
        self.pending_empty.store(false, Ordering::Release);
        debug!(chars = self.pending.len(), "buffered transcript");
    }

    fn submit(&mut self, text: String) {
        debug!(chars = text.len(), "submitting");
        let _ = self.submissions.send(text);
    }

    /// Wait briefly for an in-flight transcript, stop the engine, then
    /// submit the pending buffer combined with whatever arrived.
    fn flush(&mut self, events: &Receiver<EngineEvent>) {
        let mut arrived = None;
        if self.recording {
            arrived = self.wait_for_transcript(events, FLUSH_WAIT);
            if arrived.is_none() {
                arrived = self.wait_for_transcript(events, FLUSH_LATE_GRACE);
            }
            self.stop_engine();
        }

        let mut combined = std::mem::take(&mut self.pending);
        if let Some(text) = arrived {
            let text = text.trim();
            if !text.is_empty() {
                if !combined.is_empty() {
                    combined.push(' ');
                }
                combined.push_str(text);
            }
        }
        self.pending_empty.store(true, Ordering::Release);
        if !combined.is_empty() {
            self.submit(combined);
        }
        self.flushing.store(false, Ordering::Release);
        self.reconcile();
    }

    fn wait_for_transcript(
        &mut self,
        events: &Receiver<EngineEvent>,
        window: Duration,
    ) -> Option<String> {
        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match events.recv_timeout(remaining) {
                Ok(EngineEvent::Transcript { generation, text })
                    if generation == self.generation =>
                {
                    return Some(text);
                }
                Ok(EngineEvent::Transcript { generation, .. }) => {
                    debug!(generation, "discarding stale transcript during flush");
                }
                Ok(EngineEvent::Failed { generation, error }) => {
                    if generation == self.generation {
                        warn!(generation, %error, "turn failed during flush");
                        let _ = self.status.send(error.into());
                        return None;
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None;
                }
            }
        }
    }
}
