//! One recording cycle wired end to end.
//!
//! The composer owns the capture engine, the transcription transport, and
//! the optional archive recorder. Frames fan out once; past that point the
//! transcript and archive paths share nothing, so a failure on either side
//! cannot touch the other.

use crate::archive::ArchiveRecorder;
use crate::audio::{CaptureEngine, FrameSink, LiveLevel};
use crate::error::EngineError;
use crate::transport::{SessionParams, TranscribeTransport};
use crate::turn::CaptureBackend;
use std::time::Instant;
use tracing::debug;

/// Per-session knobs carried into every cycle.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub language: String,
    pub project: String,
    pub translate: bool,
    pub channel_capacity: usize,
}

pub struct RecordingSession {
    engine: CaptureEngine,
    transport: Box<dyn TranscribeTransport>,
    archive: Option<ArchiveRecorder>,
    options: SessionOptions,
    live: Option<LiveCycle>,
}

struct LiveCycle {
    generation: u64,
    started_at: Instant,
    transport_sink: FrameSink,
}

impl RecordingSession {
    pub fn new(
        engine: CaptureEngine,
        transport: Box<dyn TranscribeTransport>,
        archive: Option<ArchiveRecorder>,
        options: SessionOptions,
    ) -> Self {
        Self {
            engine,
            transport,
            archive,
            options,
            live: None,
        }
    }

    /// Shared loudness handle, safe to read from any thread.
    pub fn level(&self) -> LiveLevel {
        self.engine.level()
    }
}

impl CaptureBackend for RecordingSession {
    fn start(&mut self, generation: u64) -> Result<(), EngineError> {
        if self.live.is_some() {
            self.stop();
        }
        let capacity = self.options.channel_capacity;
        let (transport_sink, transport_frames) = FrameSink::bounded(capacity);
        let mut sinks = vec![transport_sink.clone()];
        let mut archive_frames = None;
        if self.archive.is_some() {
            let (sink, frames) = FrameSink::bounded(capacity);
            sinks.push(sink);
            archive_frames = Some(frames);
        }

        let sample_rate = self.engine.start(sinks)?;
        let params = SessionParams {
            generation,
            sample_rate,
            language: self.options.language.clone(),
            project: self.options.project.clone(),
            translate: self.options.translate,
        };
        if let Err(err) = self.transport.start(transport_frames, &params) {
            self.engine.stop();
            return Err(err.into());
        }
        if let (Some(archive), Some(frames)) = (self.archive.as_mut(), archive_frames) {
            archive.start(frames, &params);
        }
        self.live = Some(LiveCycle {
            generation,
            started_at: Instant::now(),
            transport_sink,
        });
        Ok(())
    }

    /// Release the microphone first so no frame lands after the drain, then
    /// hand the tail to the transport and finalize the archive.
    fn stop(&mut self) {
        let cycle = self.live.take();
        self.engine.stop();
        self.transport.stop();
        if let Some(archive) = self.archive.as_mut() {
            archive.finalize();
        }
        if let Some(cycle) = cycle {
            debug!(
                generation = cycle.generation,
                capture_ms = cycle.started_at.elapsed().as_millis() as u64,
                frames = cycle.transport_sink.delivered_frames(),
                dropped = cycle.transport_sink.dropped_frames(),
                "recording cycle complete"
            );
        }
    }
}
