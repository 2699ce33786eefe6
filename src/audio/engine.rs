//! Microphone ownership and the realtime capture callback.
//!
//! The engine holds the input stream for exactly one recording session. The
//! callback runs on the audio thread: it downmixes to mono, publishes the
//! loudness level, and posts the frame to every registered sink without
//! blocking. cpal streams cannot cross threads, so each session parks the
//! stream on its own thread and tears it down from there.

use super::fanout::{fold_to_mono, FrameFanout, FrameSink};
use super::level::{frame_level, LiveLevel};
use crate::error::CaptureError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

use super::TARGET_RATE;

/// Owns microphone acquisition and release across recording sessions.
pub struct CaptureEngine {
    preferred_device: Option<String>,
    armed: Arc<AtomicBool>,
    level: LiveLevel,
    session: Option<SessionHandle>,
}

struct SessionHandle {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
    sample_rate: u32,
}

impl CaptureEngine {
    /// List microphone names so the CLI can expose a selector.
    pub fn list_devices() -> Result<Vec<String>, CaptureError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|err| CaptureError::Permission(format!("no input devices: {err}")))?;
        let mut names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Create an engine, optionally pinned to a named device. The device is
    /// looked up on every `start` so a freshly granted permission or plugged-in
    /// microphone is picked up without rebuilding the engine.
    pub fn new(preferred_device: Option<&str>) -> Self {
        Self {
            preferred_device: preferred_device.map(str::to_string),
            armed: Arc::new(AtomicBool::new(false)),
            level: LiveLevel::new(),
            session: None,
        }
    }

    /// Live loudness handle for meters. Valid across sessions.
    pub fn level(&self) -> LiveLevel {
        self.level.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some() && self.armed.load(Ordering::Acquire)
    }

    /// Acquire the microphone and begin feeding `sinks`. Returns the device
    /// sample rate the frames arrive at.
    ///
    /// Idempotent: starting while a session is live re-arms the callback and
    /// keeps the existing stream (the sinks from the first call stay wired).
    pub fn start(&mut self, sinks: Vec<FrameSink>) -> Result<u32, CaptureError> {
        if let Some(session) = &self.session {
            self.armed.store(true, Ordering::Release);
            return Ok(session.sample_rate);
        }

        let device = bind_device(self.preferred_device.as_deref())?;
        let device_name = device
            .name()
            .unwrap_or_else(|_| "unknown input device".to_string());

        let (ready_tx, ready_rx) = bounded::<Result<u32, CaptureError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let armed = self.armed.clone();
        let level = self.level.clone();

        // Arm before the stream starts so the first callback blocks count.
        self.armed.store(true, Ordering::Release);

        let thread = std::thread::Builder::new()
            .name("voicepipe-capture".to_string())
            .spawn(move || run_capture(device, sinks, armed, level, ready_tx, stop_rx))
            .map_err(|err| {
                self.armed.store(false, Ordering::Release);
                CaptureError::Device(format!("failed to spawn capture thread: {err}"))
            })?;

        match ready_rx.recv() {
            Ok(Ok(sample_rate)) => {
                debug!(device = %device_name, sample_rate, "microphone acquired");
                self.session = Some(SessionHandle {
                    stop_tx,
                    thread,
                    sample_rate,
                });
                Ok(sample_rate)
            }
            Ok(Err(err)) => {
                self.armed.store(false, Ordering::Release);
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                self.armed.store(false, Ordering::Release);
                let _ = thread.join();
                Err(CaptureError::Device(
                    "capture thread exited before reporting readiness".to_string(),
                ))
            }
        }
    }

    /// Disarm the callback and release the microphone. Safe to call when no
    /// session is live. Returns the session's sample rate if one was open.
    pub fn stop(&mut self) -> Option<u32> {
        self.armed.store(false, Ordering::Release);
        self.level.set(0.0);
        let session = self.session.take()?;
        let _ = session.stop_tx.send(());
        let _ = session.thread.join();
        debug!(sample_rate = session.sample_rate, "microphone released");
        Some(session.sample_rate)
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind_device(preferred: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    match preferred {
        Some(name) => {
            let mut devices = host.input_devices().map_err(|err| {
                CaptureError::Permission(format!("no input devices: {err}. {}", permission_hint()))
            })?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| CaptureError::Device(format!("input device '{name}' not found")))
        }
        None => host.default_input_device().ok_or_else(|| {
            CaptureError::Permission(format!(
                "no default input device available. {}",
                permission_hint()
            ))
        }),
    }
}

fn permission_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: System Settings > Privacy & Security > Microphone (enable your terminal)."
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: check PipeWire/PulseAudio permissions and ensure the device is not muted."
    }
    #[cfg(target_os = "windows")]
    {
        "Windows: Settings > Privacy & Security > Microphone (allow access for your terminal)."
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "Check OS microphone permissions."
    }
}

/// Session thread body: build and start the stream, report readiness, then
/// park until told to tear down. The stream is dropped on this thread.
fn run_capture(
    device: cpal::Device,
    sinks: Vec<FrameSink>,
    armed: Arc<AtomicBool>,
    level: LiveLevel,
    ready_tx: Sender<Result<u32, CaptureError>>,
    stop_rx: Receiver<()>,
) {
    let stream = match build_stream(&device, sinks, armed, level) {
        Ok((stream, sample_rate)) => {
            if let Err(err) = stream.play() {
                let _ = ready_tx.send(Err(CaptureError::Device(format!(
                    "failed to start input stream: {err}"
                ))));
                return;
            }
            let _ = ready_tx.send(Ok(sample_rate));
            stream
        }
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };

    let _ = stop_rx.recv();
    if let Err(err) = stream.pause() {
        debug!("failed to pause input stream: {err}");
    }
    drop(stream);
}

fn build_stream(
    device: &cpal::Device,
    sinks: Vec<FrameSink>,
    armed: Arc<AtomicBool>,
    level: LiveLevel,
) -> Result<(cpal::Stream, u32), CaptureError> {
    let (device_config, format) = negotiate_config(device)?;
    let sample_rate = device_config.sample_rate.0;
    let channels = usize::from(device_config.channels.max(1));
    let fanout = FrameFanout::new(sinks);

    let err_fn = |err: cpal::StreamError| warn!("audio stream error: {err}");

    // Convert every supported sample type to f32 up front so the rest of the
    // pipeline stays format-agnostic.
    let stream = match format {
        SampleFormat::F32 => {
            let armed = armed.clone();
            let level = level.clone();
            let fanout = fanout.clone();
            device.build_input_stream(
                &device_config,
                move |data: &[f32], _| {
                    on_block(data, channels, |sample| sample, &armed, &level, &fanout);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let armed = armed.clone();
            let level = level.clone();
            let fanout = fanout.clone();
            device.build_input_stream(
                &device_config,
                move |data: &[i16], _| {
                    on_block(
                        data,
                        channels,
                        |sample| sample as f32 / 32_768.0,
                        &armed,
                        &level,
                        &fanout,
                    );
                },
                err_fn,
                None,
            )
        }
        SampleFormat::U16 => {
            let armed = armed.clone();
            let level = level.clone();
            let fanout = fanout.clone();
            device.build_input_stream(
                &device_config,
                move |data: &[u16], _| {
                    on_block(
                        data,
                        channels,
                        |sample| (sample as f32 - 32_768.0) / 32_768.0,
                        &armed,
                        &level,
                        &fanout,
                    );
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(CaptureError::Device(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    };

    let stream =
        stream.map_err(|err| CaptureError::Device(format!("failed to build input stream: {err}")))?;
    Ok((stream, sample_rate))
}

/// Ask for the 16 kHz transcription rate when the hardware can do it; fall
/// back to the device default otherwise and let consumers resample.
fn negotiate_config(device: &cpal::Device) -> Result<(StreamConfig, SampleFormat), CaptureError> {
    if let Ok(ranges) = device.supported_input_configs() {
        for range in ranges {
            if range.min_sample_rate().0 <= TARGET_RATE && TARGET_RATE <= range.max_sample_rate().0
            {
                let config = range.with_sample_rate(cpal::SampleRate(TARGET_RATE));
                let format = config.sample_format();
                return Ok((config.into(), format));
            }
        }
    }
    let default_config = device
        .default_input_config()
        .map_err(|err| CaptureError::Device(format!("no usable input config: {err}")))?;
    let format = default_config.sample_format();
    Ok((default_config.into(), format))
}

/// Per-block callback body. Runs on the audio thread: no locks, no I/O.
fn on_block<T, F>(
    data: &[T],
    channels: usize,
    convert: F,
    armed: &AtomicBool,
    level: &LiveLevel,
    fanout: &FrameFanout,
) where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if !armed.load(Ordering::Acquire) {
        level.set(0.0);
        return;
    }
    let mut frame = Vec::with_capacity(data.len() / channels.max(1) + 1);
    fold_to_mono(&mut frame, data, channels, convert);
    level.set(frame_level(&frame));
    fanout.post(frame);
}
