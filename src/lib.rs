//! Real-time voice capture, transcription transport and turn-taking.

pub mod archive;
pub mod audio;
pub mod config;
pub mod error;
pub mod pcm;
pub mod session;
pub mod telemetry;
pub mod transport;
pub mod turn;

pub use error::{CaptureError, EngineError, TransportError, UploadError};
pub use session::{RecordingSession, SessionOptions};
pub use turn::{TurnController, TurnMode, TurnOptions};
