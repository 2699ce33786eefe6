//! Microphone capture pipeline.
//!
//! Audio is captured via CPAL on its own callback thread, downmixed to mono,
//! and fanned out over bounded channels to the transcription transport and
//! the archival encoder. The loudness level crosses threads lock-free.

/// Sample rate the transcription services expect on the wire.
pub const TARGET_RATE: u32 = 16_000;

/// Channel count past the downmix point.
pub const TARGET_CHANNELS: u16 = 1;

mod engine;
mod fanout;
mod level;

pub use engine::CaptureEngine;
pub use fanout::{Frame, FrameSink};
pub use level::LiveLevel;

pub(crate) use level::frame_level;
