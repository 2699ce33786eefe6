//! Batched transcription: accumulate the whole utterance, post it once.
//!
//! An accumulator thread quantizes frames into the sample buffer as they
//! arrive. On stop it makes exactly one resample + quantize pass over the
//! utterance, wraps it as WAV, and posts it from a detached thread so a new
//! recording session never waits on the network.

use super::{wav, EngineEvent, ErrorSlot, SessionParams, TranscribeTransport};
use crate::audio::{Frame, TARGET_RATE};
use crate::error::TransportError;
use crate::pcm;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use reqwest::blocking::multipart;
use std::time::Duration;
use tracing::{debug, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub struct BatchTransport {
    endpoint: String,
    http: reqwest::blocking::Client,
    events: Sender<EngineEvent>,
    errors: ErrorSlot,
    live: Option<Sender<()>>,
}

impl BatchTransport {
    pub fn new(endpoint: &str, events: Sender<EngineEvent>) -> Result<Self, TransportError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| {
                TransportError::Network(format!("failed to build http client: {err}"))
            })?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            http,
            events,
            errors: ErrorSlot::default(),
            live: None,
        })
    }
}

impl TranscribeTransport for BatchTransport {
    fn start(
        &mut self,
        frames: Receiver<Frame>,
        params: &SessionParams,
    ) -> Result<(), TransportError> {
        self.stop();
        let (stop_tx, stop_rx) = bounded(1);
        let ctx = SubmitContext {
            http: self.http.clone(),
            endpoint: self.endpoint.clone(),
            params: params.clone(),
            events: self.events.clone(),
            errors: self.errors.clone(),
        };
        std::thread::Builder::new()
            .name("voicepipe-batch".to_string())
            .spawn(move || accumulate(frames, stop_rx, ctx))
            .map_err(|err| {
                TransportError::Network(format!("failed to spawn batch worker: {err}"))
            })?;
        self.live = Some(stop_tx);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.live.take() {
            let _ = stop_tx.send(());
        }
    }

    fn recording(&self) -> bool {
        self.live.is_some()
    }

    fn last_error(&self) -> Option<TransportError> {
        self.errors.peek()
    }
}

struct SubmitContext {
    http: reqwest::blocking::Client,
    endpoint: String,
    params: SessionParams,
    events: Sender<EngineEvent>,
    errors: ErrorSlot,
}

fn accumulate(frames: Receiver<Frame>, stop_rx: Receiver<()>, ctx: SubmitContext) {
    let mut buffer: Vec<i16> = Vec::new();
    loop {
        select! {
            recv(frames) -> frame => match frame {
                Ok(frame) => buffer.extend(pcm::to_i16(&frame)),
                Err(_) => break,
            },
            recv(stop_rx) -> _ => break,
        }
    }
    // Pick up frames that raced in ahead of the stop signal.
    while let Ok(frame) = frames.try_recv() {
        buffer.extend(pcm::to_i16(&frame));
    }

    if buffer.is_empty() {
        debug!(
            generation = ctx.params.generation,
            "no audio captured; skipping submit"
        );
        return;
    }

    // The POST rides its own thread so the next session can start while this
    // one is still in flight; a stale result is discarded by generation.
    let spawned = std::thread::Builder::new()
        .name("voicepipe-batch-submit".to_string())
        .spawn(move || submit(buffer, ctx));
    if let Err(err) = spawned {
        warn!("failed to spawn submit thread: {err}");
    }
}

fn submit(buffer: Vec<i16>, ctx: SubmitContext) {
    let generation = ctx.params.generation;
    // One resample + quantize pass over the full utterance.
    let samples = pcm::to_i16(&pcm::resample(
        &pcm::from_i16(&buffer),
        ctx.params.sample_rate,
        TARGET_RATE,
    ));
    let body = match wav::wrap_pcm16(&samples) {
        Ok(body) => body,
        Err(err) => {
            report(
                &ctx,
                TransportError::Network(format!("failed to assemble wav body: {err}")),
            );
            return;
        }
    };
    debug!(generation, bytes = body.len(), "submitting utterance");

    let part = match multipart::Part::bytes(body)
        .file_name("utterance.wav")
        .mime_str("audio/wav")
    {
        Ok(part) => part,
        Err(err) => {
            report(
                &ctx,
                TransportError::Network(format!("failed to build multipart body: {err}")),
            );
            return;
        }
    };
    let form = multipart::Form::new().part("file", part);

    let response = ctx
        .http
        .post(&ctx.endpoint)
        .query(&[
            ("language", ctx.params.language.as_str()),
            ("project", ctx.params.project.as_str()),
        ])
        .multipart(form)
        .send();

    match response {
        Ok(response) => {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            if status.is_success() {
                let _ = ctx.events.send(EngineEvent::Transcript {
                    generation,
                    text: text.trim().to_string(),
                });
            } else {
                report(
                    &ctx,
                    TransportError::Transcription {
                        status: status.as_u16(),
                        body: text.trim().to_string(),
                    },
                );
            }
        }
        Err(err) => report(&ctx, TransportError::Network(err.to_string())),
    }
}

fn report(ctx: &SubmitContext, error: TransportError) {
    warn!(generation = ctx.params.generation, %error, "batched transcription failed");
    ctx.errors.set(error.clone());
    let _ = ctx.events.send(EngineEvent::Failed {
        generation: ctx.params.generation,
        error,
    });
}
