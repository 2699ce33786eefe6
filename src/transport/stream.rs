//! Streamed transcription over a per-session WebSocket.
//!
//! One connection per recording session, dialed by a worker thread so the
//! caller never waits on the network. The worker drains the sample buffer on
//! a fixed cadence and ships each chunk as one binary frame; the server
//! answers with JSON text messages and the first non-empty transcription
//! ends the turn. A connection sequence number guards the stale-open race:
//! an open that completes after a newer session has started is closed
//! unused.

use super::{EngineEvent, ErrorSlot, SessionParams, TranscribeTransport, STREAM_FLUSH_INTERVAL_MS};
use crate::audio::{Frame, TARGET_RATE};
use crate::error::TransportError;
use crate::pcm;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Deserialize;
use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Bytes, Message, WebSocket};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Read timeout while polling. Short enough that the flush cadence and stop
/// signal are checked many times per interval.
const POLL_TICK: Duration = Duration::from_millis(50);

/// How long to wait for the server's close acknowledgement after stop.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

type WsSocket = WebSocket<MaybeTlsStream<TcpStream>>;

pub struct StreamTransport {
    endpoint: Url,
    events: Sender<EngineEvent>,
    errors: ErrorSlot,
    connection_seq: Arc<AtomicU64>,
    live: Option<Sender<()>>,
}

impl StreamTransport {
    pub fn new(endpoint: &str, events: Sender<EngineEvent>) -> Result<Self, TransportError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| TransportError::Network(format!("invalid stream endpoint: {err}")))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(TransportError::Network(format!(
                "stream endpoint must be ws:// or wss://, got {}://",
                endpoint.scheme()
            )));
        }
        Ok(Self {
            endpoint,
            events,
            errors: ErrorSlot::default(),
            connection_seq: Arc::new(AtomicU64::new(0)),
            live: None,
        })
    }
}

impl TranscribeTransport for StreamTransport {
    fn start(
        &mut self,
        frames: Receiver<Frame>,
        params: &SessionParams,
    ) -> Result<(), TransportError> {
        self.stop();
        // Claim the next connection sequence before dialing. A worker whose
        // open completes under an older sequence closes its socket unused.
        let sequence = self.connection_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let (stop_tx, stop_rx) = bounded(1);
        let ctx = StreamContext {
            uri: session_uri(&self.endpoint, params),
            params: params.clone(),
            events: self.events.clone(),
            errors: self.errors.clone(),
            latest_seq: Arc::clone(&self.connection_seq),
            sequence,
        };
        std::thread::Builder::new()
            .name("voicepipe-stream".to_string())
            .spawn(move || run_session(frames, stop_rx, ctx))
            .map_err(|err| {
                TransportError::Network(format!("failed to spawn stream worker: {err}"))
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

struct StreamContext {
    uri: Url,
    params: SessionParams,
    events: Sender<EngineEvent>,
    errors: ErrorSlot,
    latest_seq: Arc<AtomicU64>,
    sequence: u64,
}

impl StreamContext {
    fn superseded(&self) -> bool {
        self.latest_seq.load(Ordering::Acquire) != self.sequence
    }

    fn report(&self, error: TransportError) {
        warn!(generation = self.params.generation, %error, "streamed transcription failed");
        self.errors.set(error.clone());
        let _ = self.events.send(EngineEvent::Failed {
            generation: self.params.generation,
            error,
        });
    }
}

fn run_session(frames: Receiver<Frame>, stop_rx: Receiver<()>, ctx: StreamContext) {
    let mut socket = match connect(&ctx.uri) {
        Ok(socket) => socket,
        Err(error) => {
            if !ctx.superseded() {
                ctx.report(error);
            }
            return;
        }
    };
    if ctx.superseded() {
        debug!(sequence = ctx.sequence, "closing superseded connection");
        let _ = socket.close(None);
        drain_close(&mut socket);
        return;
    }
    debug!(
        generation = ctx.params.generation,
        uri = %ctx.uri,
        "stream session connected"
    );

    // Priming burst: one flush interval of silence so the remote side can
    // settle its input pipeline before real speech arrives.
    let priming = vec![0u8; (TARGET_RATE as u64 * STREAM_FLUSH_INTERVAL_MS / 1_000) as usize * 2];
    if let Err(err) = socket.send(Message::Binary(priming.into())) {
        if !would_block(&err) {
            ctx.report(stream_failure(&err));
            return;
        }
    }

    let flush_interval = Duration::from_millis(STREAM_FLUSH_INTERVAL_MS);
    let mut buffer: Vec<i16> = Vec::new();
    let mut last_flush = Instant::now();
    let mut armed = true;
    let mut client_close = false;
    let mut surfaced = false;
    let mut close_deadline: Option<Instant> = None;

    loop {
        if armed && stop_rx.try_recv().is_ok() {
            armed = false;
        }
        while let Ok(frame) = frames.try_recv() {
            buffer.extend(pcm::to_i16(&frame));
        }

        if !armed && close_deadline.is_none() {
            // Tail flush, zero-length termination frame, then a close marked
            // as ours so the resulting close event is not read as a failure.
            if let Err(err) = ship(&mut socket, &mut buffer, ctx.params.sample_rate, true) {
                debug!(generation = ctx.params.generation, error = %err, "tail flush failed");
            }
            let _ = socket.send(Message::Binary(Bytes::new()));
            client_close = true;
            let _ = socket.close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "session complete".into(),
            }));
            close_deadline = Some(Instant::now() + CLOSE_GRACE);
        } else if armed && last_flush.elapsed() >= flush_interval && !buffer.is_empty() {
            if let Err(err) = ship(&mut socket, &mut buffer, ctx.params.sample_rate, false) {
                ctx.report(stream_failure(&err));
                return;
            }
            last_flush = Instant::now();
        }

        if close_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }

        match socket.read() {
            Ok(Message::Text(payload)) => {
                if !surfaced {
                    if let Some(text) = final_transcription(payload.as_str()) {
                        surfaced = true;
                        let _ = ctx.events.send(EngineEvent::Transcript {
                            generation: ctx.params.generation,
                            text,
                        });
                    }
                }
            }
            Ok(Message::Close(frame)) => {
                if !client_close {
                    let code = frame.map(|frame| u16::from(frame.code)).unwrap_or(1005);
                    ctx.report(TransportError::Stream {
                        code,
                        hint: close_hint(code),
                    });
                    return;
                }
            }
            Ok(_) => {}
            Err(err) if would_block(&err) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                if !client_close {
                    ctx.report(TransportError::Stream {
                        code: 1006,
                        hint: close_hint(1006),
                    });
                }
                break;
            }
            Err(err) => {
                if !client_close {
                    ctx.report(stream_failure(&err));
                }
                break;
            }
        }
    }
    debug!(generation = ctx.params.generation, "stream session closed");
}

/// Append session identity to the endpoint query.
fn session_uri(endpoint: &Url, params: &SessionParams) -> Url {
    let mut uri = endpoint.clone();
    uri.query_pairs_mut()
        .append_pair("project", &params.project)
        .append_pair("language", &params.language)
        .append_pair(
            "translate",
            if params.translate { "true" } else { "false" },
        );
    uri
}

fn connect(uri: &Url) -> Result<WsSocket, TransportError> {
    let host = uri
        .host_str()
        .ok_or_else(|| TransportError::Network("stream endpoint has no host".to_string()))?
        .to_string();
    let port = uri.port_or_known_default().unwrap_or(80);
    let addr = (host.as_str(), port)
        .to_socket_addrs()
        .map_err(|err| TransportError::Network(format!("failed to resolve {host}: {err}")))?
        .next()
        .ok_or_else(|| TransportError::Network(format!("no address for {host}")))?;

    let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).map_err(|err| {
        TransportError::Network(format!("failed to connect to {host}:{port}: {err}"))
    })?;
    let _ = tcp.set_nodelay(true);
    tcp.set_read_timeout(Some(CONNECT_TIMEOUT))
        .map_err(|err| TransportError::Network(format!("failed to arm read timeout: {err}")))?;
    tcp.set_write_timeout(Some(WRITE_TIMEOUT))
        .map_err(|err| TransportError::Network(format!("failed to arm write timeout: {err}")))?;

    let stream = if uri.scheme() == "wss" {
        let connector = native_tls::TlsConnector::new().map_err(|err| {
            TransportError::Network(format!("failed to build tls connector: {err}"))
        })?;
        let tls = connector
            .connect(&host, tcp)
            .map_err(|err| TransportError::Network(format!("tls handshake failed: {err}")))?;
        MaybeTlsStream::NativeTls(tls)
    } else {
        MaybeTlsStream::Plain(tcp)
    };

    let (socket, _response) = tungstenite::client::client(uri.as_str(), stream)
        .map_err(|err| TransportError::Network(format!("websocket handshake failed: {err}")))?;
    // From here on the worker polls: short read timeouts, never block long.
    set_read_timeout(&socket, POLL_TICK);
    Ok(socket)
}

fn set_read_timeout(socket: &WsSocket, timeout: Duration) {
    let tcp = match socket.get_ref() {
        MaybeTlsStream::Plain(tcp) => tcp,
        MaybeTlsStream::NativeTls(tls) => tls.get_ref(),
        _ => return,
    };
    let _ = tcp.set_read_timeout(Some(timeout));
}

/// Resample and ship one chunk of the sample buffer as a binary frame.
///
/// Partial drains take whole resampling blocks so per-chunk rounding cannot
/// accumulate across a turn; the stop-time drain takes everything left. A
/// frame the socket cannot take right now stays queued inside the websocket
/// and rides out with a later write, so audio is never dropped.
fn ship(
    socket: &mut WsSocket,
    buffer: &mut Vec<i16>,
    source_rate: u32,
    tail: bool,
) -> Result<(), tungstenite::Error> {
    let take = if tail {
        buffer.len()
    } else {
        drainable(buffer.len(), source_rate, TARGET_RATE)
    };
    if take == 0 {
        return Ok(());
    }
    let chunk: Vec<i16> = buffer.drain(..take).collect();
    let samples = pcm::to_i16(&pcm::resample(
        &pcm::from_i16(&chunk),
        source_rate,
        TARGET_RATE,
    ));
    match socket.send(Message::Binary(pcm::pcm16_bytes(&samples).into())) {
        Ok(()) => Ok(()),
        Err(err) if would_block(&err) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Largest prefix that resamples to a whole number of target-rate samples.
fn drainable(len: usize, source_rate: u32, target_rate: u32) -> usize {
    if source_rate == 0 || target_rate == 0 {
        return len;
    }
    let block = (source_rate / gcd(source_rate, target_rate)) as usize;
    len - len % block
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

#[derive(Deserialize)]
struct ServerPayload {
    #[serde(default)]
    transcription: String,
}

/// Parse a server text message, returning the trimmed transcription when the
/// payload carries a non-empty one.
fn final_transcription(payload: &str) -> Option<String> {
    let parsed: ServerPayload = serde_json::from_str(payload).ok()?;
    let text = parsed.transcription.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Human hints for close codes, shown when a session dies without a
/// client-initiated close.
fn close_hint(code: u16) -> &'static str {
    match code {
        1001 => "server going away",
        1005 => "no server response",
        1006 => "connection interrupted",
        1011 => "server error",
        1013 => "server at capacity",
        _ => "connection closed unexpectedly",
    }
}

fn stream_failure(error: &tungstenite::Error) -> TransportError {
    debug!(%error, "stream transport failure");
    TransportError::Stream {
        code: 1006,
        hint: close_hint(1006),
    }
}

fn would_block(error: &tungstenite::Error) -> bool {
    matches!(
        error,
        tungstenite::Error::Io(err)
            if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
    )
}

/// Drive the close handshake briefly so the server sees a clean shutdown.
fn drain_close(socket: &mut WsSocket) {
    let deadline = Instant::now() + CLOSE_GRACE;
    while Instant::now() < deadline {
        match socket.read() {
            Ok(_) => {}
            Err(err) if would_block(&err) => {}
            Err(_) => break,
        }
    }
}
