//! voicepipe entrypoint wiring capture, transport and turn-taking together.
//!
//! stdout carries one line per submission or status report; logs go to
//! stderr. stdin is a tiny control protocol, one command per line:
//! `pause`, `resume`, `flush`, `mode auto`, `mode buffered`, `quit`.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{select, unbounded, Receiver};
use std::io::BufRead;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use voicepipe::archive::ArchiveRecorder;
use voicepipe::audio::CaptureEngine;
use voicepipe::config::{AppConfig, Strategy, MAX_MIC_CHECK_MS, MIN_MIC_CHECK_MS};
use voicepipe::session::RecordingSession;
use voicepipe::telemetry;
use voicepipe::transport::{BatchTransport, StreamTransport, TranscribeTransport};
use voicepipe::turn::{TurnController, TurnMode, TurnOptions};
use voicepipe::EngineError;

/// Peak level below which the mic check calls the input silent.
const SILENCE_PEAK: f32 = 0.05;

/// Timeout for archive upload requests.
const ARCHIVE_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

fn main() -> Result<()> {
    let mut config = AppConfig::parse();

    // Device listing and the mic check run without endpoints, so they
    // skip validation on purpose.
    if config.list_input_devices {
        list_input_devices();
        return Ok(());
    }
    if config.mic_check {
        return run_mic_check(&config);
    }

    config.validate()?;
    telemetry::init_tracing(&config);
    debug!(strategy = ?config.strategy, mode = ?config.mode, "voicepipe started");
    run_engine(&config)
}

fn run_engine(config: &AppConfig) -> Result<()> {
    let (events_tx, events_rx) = unbounded();
    let transport: Box<dyn TranscribeTransport> = match config.strategy {
        Strategy::Batch => {
            let endpoint = config
                .transcribe_url
                .as_deref()
                .context("missing transcription endpoint")?;
            Box::new(BatchTransport::new(endpoint, events_tx)?)
        }
        Strategy::Stream => {
            let endpoint = config
                .stream_url
                .as_deref()
                .context("missing stream endpoint")?;
            Box::new(StreamTransport::new(endpoint, events_tx)?)
        }
    };
    let archive = match config.archive_url.as_deref() {
        Some(endpoint) => {
            let http = reqwest::blocking::Client::builder()
                .timeout(ARCHIVE_HTTP_TIMEOUT)
                .build()
                .context("failed to build the archive http client")?;
            Some(ArchiveRecorder::new(endpoint, http))
        }
        None => None,
    };

    let engine = CaptureEngine::new(config.input_device.as_deref());
    let session = RecordingSession::new(engine, transport, archive, config.session_options());

    let (submissions_tx, submissions_rx) = unbounded();
    let (status_tx, status_rx) = unbounded();
    let controller = TurnController::spawn(
        Box::new(session),
        events_rx,
        submissions_tx,
        status_tx,
        TurnOptions {
            mode: config.mode,
            may_record: true,
            suspended: false,
        },
    );

    let lines_rx = spawn_stdin_reader();
    loop {
        select! {
            recv(submissions_rx) -> submission => match submission {
                Ok(text) => emit_submission(config.json, &text),
                Err(_) => break,
            },
            recv(status_rx) -> status => match status {
                Ok(error) => emit_status(config.json, &error),
                Err(_) => break,
            },
            recv(lines_rx) -> line => match line {
                Ok(line) => {
                    if !handle_command(&controller, &line) {
                        break;
                    }
                }
                // stdin closed; treat EOF like quit.
                Err(_) => break,
            },
        }
    }

    controller.shutdown();
    debug!("voicepipe stopped");
    Ok(())
}

fn list_input_devices() {
    // VOICEPIPE_TEST_DEVICES overrides enumeration for tests.
    let devices = if let Ok(raw) = std::env::var("VOICEPIPE_TEST_DEVICES") {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed
                .split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        }
    } else {
        CaptureEngine::list_devices().unwrap_or_else(|err| {
            eprintln!("Failed to list audio input devices: {err}");
            Vec::new()
        })
    };

    if devices.is_empty() {
        println!("No audio input devices detected.");
    } else {
        println!("Available audio input devices:");
        for name in devices {
            println!("  - {name}");
        }
    }
}

/// Open the input, watch the live level for a moment, and report the range.
fn run_mic_check(config: &AppConfig) -> Result<()> {
    let duration = Duration::from_millis(
        config
            .mic_check_ms
            .clamp(MIN_MIC_CHECK_MS, MAX_MIC_CHECK_MS),
    );
    let mut engine = CaptureEngine::new(config.input_device.as_deref());
    let sample_rate = engine
        .start(Vec::new())
        .context("unable to open the audio input")?;
    println!(
        "Sampling input level for {} ms at {} Hz...",
        duration.as_millis(),
        sample_rate
    );

    let level = engine.level();
    let started = Instant::now();
    let mut peak = 0.0_f32;
    let mut floor = f32::MAX;
    while started.elapsed() < duration {
        thread::sleep(Duration::from_millis(25));
        let now = level.get();
        peak = peak.max(now);
        floor = floor.min(now);
    }
    engine.stop();

    if floor > peak {
        floor = 0.0;
    }
    println!("Input level range: {floor:.3} to {peak:.3}");
    if peak < SILENCE_PEAK {
        println!("Input looks silent. Check the microphone or pick another device.");
    }
    Ok(())
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    let _ = thread::Builder::new()
        .name("voicepipe-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    rx
}

fn emit_submission(json: bool, text: &str) {
    if json {
        println!("{}", serde_json::json!({ "type": "submission", "text": text }));
    } else {
        println!(">> {text}");
    }
}

fn emit_status(json: bool, error: &EngineError) {
    if json {
        println!(
            "{}",
            serde_json::json!({ "type": "status", "error": error.to_string() })
        );
    } else {
        println!("!! {error}");
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LineCommand {
    Quit,
    Pause,
    Resume,
    Flush,
    Mode(TurnMode),
    Unknown(String),
    Empty,
}

fn parse_command(line: &str) -> LineCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineCommand::Empty;
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "quit" | "exit" => LineCommand::Quit,
        "pause" => LineCommand::Pause,
        "resume" => LineCommand::Resume,
        "flush" => LineCommand::Flush,
        "mode auto" | "mode auto-send" => LineCommand::Mode(TurnMode::AutoSend),
        "mode buffered" => LineCommand::Mode(TurnMode::Buffered),
        _ => LineCommand::Unknown(trimmed.to_string()),
    }
}

/// Returns false when the session should end.
fn handle_command(controller: &TurnController, line: &str) -> bool {
    match parse_command(line) {
        LineCommand::Quit => return false,
        LineCommand::Pause => controller.set_suspended(true),
        LineCommand::Resume => controller.set_suspended(false),
        LineCommand::Flush => controller.flush(),
        LineCommand::Mode(mode) => controller.set_mode(mode),
        LineCommand::Unknown(command) => {
            println!(
                "Unknown command: {command}. Try pause, resume, flush, mode auto, mode buffered or quit."
            );
        }
        LineCommand::Empty => {}
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quit_and_exit_end_the_session() {
        assert_eq!(parse_command("quit"), LineCommand::Quit);
        assert_eq!(parse_command("exit"), LineCommand::Quit);
        assert_eq!(parse_command("  QUIT  "), LineCommand::Quit);
    }

    #[test]
    fn commands_are_case_insensitive() {
        assert_eq!(parse_command("PAUSE"), LineCommand::Pause);
        assert_eq!(parse_command("Resume"), LineCommand::Resume);
        assert_eq!(parse_command("Flush"), LineCommand::Flush);
        assert_eq!(
            parse_command("Mode Buffered"),
            LineCommand::Mode(TurnMode::Buffered)
        );
        assert_eq!(
            parse_command("mode auto-send"),
            LineCommand::Mode(TurnMode::AutoSend)
        );
    }

    #[test]
    fn unknown_lines_keep_their_text() {
        assert_eq!(
            parse_command("  shout louder "),
            LineCommand::Unknown("shout louder".to_string())
        );
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse_command(""), LineCommand::Empty);
        assert_eq!(parse_command("   "), LineCommand::Empty);
    }
}
