//! Worker that runs the archival encoder and hands the artifact to upload.

use super::encoder::{measure_duration_secs, ArchiveEncoder};
use super::upload;
use crate::audio::Frame;
use crate::transport::SessionParams;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use tracing::{debug, warn};

/// Best-effort archival of each recording session as Ogg/Opus.
///
/// The recorder never pushes back on capture and never surfaces into the
/// conversational flow: encode or upload failures are logged and dropped.
pub struct ArchiveRecorder {
    endpoint: String,
    http: reqwest::blocking::Client,
    live: Option<Sender<()>>,
}

impl ArchiveRecorder {
    pub fn new(endpoint: &str, http: reqwest::blocking::Client) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            http,
            live: None,
        }
    }

    /// Spawn the encode worker for one session.
    pub fn start(&mut self, frames: Receiver<Frame>, params: &SessionParams) {
        self.finalize();
        let (stop_tx, stop_rx) = bounded(1);
        let ctx = ArchiveContext {
            endpoint: self.endpoint.clone(),
            http: self.http.clone(),
            params: params.clone(),
        };
        let spawned = std::thread::Builder::new()
            .name("voicepipe-archive".to_string())
            .spawn(move || run_encoder(frames, stop_rx, ctx));
        match spawned {
            Ok(_) => self.live = Some(stop_tx),
            Err(err) => warn!("failed to spawn archive worker: {err}"),
        }
    }

    /// Tell the worker to flush, measure, and upload. Returns immediately;
    /// the upload finishes in the background.
    pub fn finalize(&mut self) {
        if let Some(stop_tx) = self.live.take() {
            let _ = stop_tx.send(());
        }
    }
}

struct ArchiveContext {
    endpoint: String,
    http: reqwest::blocking::Client,
    params: SessionParams,
}

fn run_encoder(frames: Receiver<Frame>, stop_rx: Receiver<()>, ctx: ArchiveContext) {
    let serial = ctx.params.generation as u32;
    let mut encoder = match ArchiveEncoder::new(ctx.params.sample_rate, serial) {
        Ok(encoder) => encoder,
        Err(err) => {
            warn!("archive encoder unavailable: {err}");
            drain_until_stopped(frames, stop_rx);
            return;
        }
    };

    let mut failed = false;
    loop {
        select! {
            recv(frames) -> frame => match frame {
                Ok(frame) => failed = failed || !encode_frame(&mut encoder, &frame),
                Err(_) => break,
            },
            recv(stop_rx) -> _ => break,
        }
    }
    // Pick up frames that raced in ahead of the stop signal.
    while let Ok(frame) = frames.try_recv() {
        failed = failed || !encode_frame(&mut encoder, &frame);
    }
    if failed {
        return;
    }

    let blob = match encoder.finish() {
        Ok(blob) => blob,
        Err(err) => {
            warn!("archive finalize failed: {err}");
            return;
        }
    };
    let duration_secs = measure_duration_secs(&blob);
    debug!(
        generation = ctx.params.generation,
        bytes = blob.len(),
        duration_secs,
        "archive artifact ready"
    );
    if let Err(err) = upload::send(&ctx.http, &ctx.endpoint, &ctx.params, blob, duration_secs) {
        warn!("{err}");
    }
}

fn encode_frame(encoder: &mut ArchiveEncoder, frame: &[f32]) -> bool {
    match encoder.push(frame) {
        Ok(()) => true,
        Err(err) => {
            warn!("archive encode failed: {err}");
            false
        }
    }
}

fn drain_until_stopped(frames: Receiver<Frame>, stop_rx: Receiver<()>) {
    loop {
        select! {
            recv(frames) -> frame => {
                if frame.is_err() {
                    break;
                }
            }
            recv(stop_rx) -> _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::io::Read;
    use std::time::Duration;

    #[test]
    fn finalize_uploads_artifact_with_metadata() {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("bind");
        let addr = server.server_addr().to_ip().expect("ip");
        let (seen_tx, seen_rx) = unbounded();
        let server_thread = std::thread::spawn(move || {
            let mut request = server.recv().expect("request");
            let mut body = Vec::new();
            let _ = request.as_reader().read_to_end(&mut body);
            let _ = seen_tx.send(body);
            let _ = request.respond(tiny_http::Response::from_string("ok"));
        });

        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("client");
        let mut recorder = ArchiveRecorder::new(&format!("http://{addr}/recordings"), http);
        let params = SessionParams {
            generation: 3,
            sample_rate: 16_000,
            language: "en".to_string(),
            project: "demo".to_string(),
            translate: false,
        };
        let (frames_tx, frames_rx) = unbounded();
        recorder.start(frames_rx, &params);
        for _ in 0..5 {
            frames_tx.send(vec![0.05f32; 1_600]).expect("frame");
        }
        recorder.finalize();

        let body = seen_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("upload arrived");
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("demo-3.ogg"), "filename missing");
        assert!(text.contains("audio/ogg"), "mime type missing");
        assert!(text.contains("duration_sec"), "duration field missing");
        assert!(text.contains("size_bytes"), "size field missing");
        assert!(body.windows(4).any(|w| w == b"OggS"), "no ogg payload");
        server_thread.join().expect("server thread");
    }

    #[test]
    fn upload_failure_stays_contained() {
        // Nothing listens on the endpoint; finalize must neither block the
        // caller nor panic the worker.
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(300))
            .build()
            .expect("client");
        let mut recorder = ArchiveRecorder::new("http://127.0.0.1:9/recordings", http);
        let params = SessionParams {
            generation: 4,
            sample_rate: 16_000,
            language: "en".to_string(),
            project: "demo".to_string(),
            translate: false,
        };
        let (frames_tx, frames_rx) = unbounded();
        recorder.start(frames_rx, &params);
        frames_tx.send(vec![0.0f32; 320]).expect("frame");
        recorder.finalize();
        // Give the worker a moment; the test passes by not hanging.
        std::thread::sleep(Duration::from_millis(600));
    }
}
