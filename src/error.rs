//! Error taxonomy for the capture and transcription pipeline.
//!
//! Each stage gets its own enum so callers can tell a microphone problem
//! from a transport problem without string matching. `EngineError` is the
//! umbrella type carried on control channels.

use thiserror::Error;

/// Failures acquiring or running the microphone capture graph.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    /// Microphone access was denied or no input device is present.
    #[error("microphone unavailable: {0}")]
    Permission(String),

    /// The audio subsystem refused to build or start the input stream.
    #[error("audio input failed: {0}")]
    Device(String),
}

/// Failures on either transcription transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request never reached the service.
    #[error("transcription request failed: {0}")]
    Network(String),

    /// The service answered with a non-success status.
    #[error("transcription service returned {status}: {body}")]
    Transcription { status: u16, body: String },

    /// The streaming connection closed abnormally while a turn was live.
    #[error("stream closed ({code}): {hint}")]
    Stream { code: u16, hint: &'static str },
}

/// Archive upload failure. Logged, never propagated into the turn flow.
#[derive(Debug, Clone, Error)]
#[error("archive upload failed: {0}")]
pub struct UploadError(pub String);

/// Umbrella error surfaced to callers as transient status.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Upload(#[from] UploadError),
}
