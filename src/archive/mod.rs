//! Session archival: incremental Ogg/Opus encoding plus background upload.
//!
//! Strictly best-effort. Failures are logged and never enter the turn flow.

mod encoder;
mod recorder;
mod upload;

pub use recorder::ArchiveRecorder;
