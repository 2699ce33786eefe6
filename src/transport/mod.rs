//! Transcription transports.
//!
//! Two interchangeable strategies move captured audio to the transcription
//! service: `BatchTransport` accumulates a whole utterance and posts it once,
//! `StreamTransport` keeps a WebSocket open and ships PCM chunks on a fixed
//! cadence. Both deliver results and failures as `EngineEvent`s tagged with
//! the generation that produced them, so late arrivals from a dead session
//! can be discarded.

mod batch;
mod stream;
#[cfg(test)]
mod tests;
mod wav;

pub use batch::BatchTransport;
pub use stream::StreamTransport;

use crate::audio::Frame;
use crate::error::TransportError;
use crossbeam_channel::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};

/// How often the streaming strategy ships accumulated PCM.
pub const STREAM_FLUSH_INTERVAL_MS: u64 = 500;

/// Identity of one recording session, carried by every request and result.
#[derive(Clone, Debug)]
pub struct SessionParams {
    pub generation: u64,
    pub sample_rate: u32,
    pub language: String,
    pub project: String,
    pub translate: bool,
}

/// Control-plane messages emitted by transport workers.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    /// Final transcript for the utterance recorded under `generation`. The
    /// text may be empty when the service heard nothing.
    Transcript { generation: u64, text: String },

    /// A transport failure for that generation, surfaced as transient status.
    Failed {
        generation: u64,
        error: TransportError,
    },
}

/// Shared slot holding the most recent transport failure.
#[derive(Clone, Default)]
pub struct ErrorSlot {
    inner: Arc<Mutex<Option<TransportError>>>,
}

impl ErrorSlot {
    pub fn set(&self, error: TransportError) {
        *self.lock() = Some(error);
    }

    /// Read without clearing.
    pub fn peek(&self) -> Option<TransportError> {
        self.lock().clone()
    }

    /// Read and clear.
    pub fn take(&self) -> Option<TransportError> {
        self.lock().take()
    }

    fn lock(&self) -> MutexGuard<'_, Option<TransportError>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Where utterance audio goes and how results come back.
///
/// `start` hands the worker the consumer half of the frame channel; the
/// producer half lives in the capture callback. `stop` issues the tail
/// handoff and teardown but does not wait for in-flight network work, so the
/// next session can start immediately.
pub trait TranscribeTransport: Send {
    fn start(
        &mut self,
        frames: Receiver<Frame>,
        params: &SessionParams,
    ) -> Result<(), TransportError>;

    fn stop(&mut self);

    /// True between a successful `start` and the next `stop`.
    fn recording(&self) -> bool;

    /// Most recent failure, for callers that poll instead of consuming events.
    fn last_error(&self) -> Option<TransportError>;
}
