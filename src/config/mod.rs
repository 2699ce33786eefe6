//! Command-line parsing and validation helpers.
//!
//! Parsing and validation are split so tests can build an [`AppConfig`]
//! with `parse_from` and probe `validate()` directly. Every knob that
//! reaches a worker thread is range-checked here, before anything spawns.

mod defaults;
mod validation;

use clap::{Parser, ValueEnum};

use crate::session::SessionOptions;
use crate::turn::TurnMode;

pub use defaults::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_LANGUAGE, DEFAULT_MIC_CHECK_MS, DEFAULT_PROJECT,
    MAX_MIC_CHECK_MS, MIN_MIC_CHECK_MS,
};

/// How utterance audio reaches the transcription service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// Accumulate the whole utterance and post it once at stop.
    Batch,
    /// Ship PCM chunks over a persistent WebSocket while capturing.
    Stream,
}

/// CLI options for the voicepipe engine. Validated values keep the remote
/// endpoints and the capture loop well-formed before any thread spawns.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "voicepipe",
    about = "Real-time voice capture and turn-taking engine",
    version
)]
pub struct AppConfig {
    /// Batched transcription endpoint (http:// or https://)
    #[arg(long = "transcribe-url", env = "VOICEPIPE_TRANSCRIBE_URL")]
    pub transcribe_url: Option<String>,

    /// Streaming transcription endpoint (ws:// or wss://)
    #[arg(long = "stream-url", env = "VOICEPIPE_STREAM_URL")]
    pub stream_url: Option<String>,

    /// Archive upload endpoint; omit to disable session archival
    #[arg(long = "archive-url", env = "VOICEPIPE_ARCHIVE_URL")]
    pub archive_url: Option<String>,

    /// Transport strategy for utterance audio
    #[arg(long, value_enum, default_value_t = Strategy::Stream)]
    pub strategy: Strategy,

    /// Turn-taking mode at startup
    #[arg(long, value_enum, default_value_t = TurnMode::AutoSend)]
    pub mode: TurnMode,

    /// Utterance language: an ISO-639-1 code, a locale like pt-BR, or auto
    #[arg(long, default_value = DEFAULT_LANGUAGE)]
    pub language: String,

    /// Ask the transcription service to translate transcripts to English
    #[arg(long, default_value_t = false)]
    pub translate: bool,

    /// Project identifier attached to every transcription and upload
    #[arg(long, default_value = DEFAULT_PROJECT)]
    pub project: String,

    /// Preferred audio input device name
    #[arg(long = "input-device")]
    pub input_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Sample the ambient input level for a moment, print it, and exit
    #[arg(long = "mic-check", default_value_t = false)]
    pub mic_check: bool,

    /// Mic check duration in milliseconds
    #[arg(long = "mic-check-ms", default_value_t = DEFAULT_MIC_CHECK_MS)]
    pub mic_check_ms: u64,

    /// Frame channel capacity between capture and each transport worker
    #[arg(long = "channel-capacity", default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,

    /// Emit submissions and status lines as JSON instead of plain text
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Enable debug logging to stderr
    #[arg(long, env = "VOICEPIPE_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all logging, overriding --logs
    #[arg(long = "no-logs", env = "VOICEPIPE_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,
}

impl AppConfig {
    /// Snapshot the per-session knobs the recording session needs.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            language: self.language.clone(),
            project: self.project.clone(),
            translate: self.translate,
            channel_capacity: self.channel_capacity,
        }
    }
}
