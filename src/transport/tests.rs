//! Transport tests: the batched strategy against a local tiny_http server,
//! the streamed strategy against an in-process tungstenite acceptor.

use super::*;
use crossbeam_channel::{bounded, unbounded};
use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::time::Duration;
use tungstenite::handshake::server::{Request, Response};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::Message;

fn params(generation: u64, sample_rate: u32) -> SessionParams {
    SessionParams {
        generation,
        sample_rate,
        language: "en".to_string(),
        project: "demo".to_string(),
        translate: false,
    }
}

fn accept_stream(listener: &TcpListener) -> tungstenite::WebSocket<TcpStream> {
    let (stream, _) = listener.accept().expect("accept");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    tungstenite::accept(stream).expect("server handshake")
}

fn expect_binary(socket: &mut tungstenite::WebSocket<TcpStream>) -> Vec<u8> {
    loop {
        match socket.read().expect("read") {
            Message::Binary(data) => return data.to_vec(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("expected binary frame, got {other:?}"),
        }
    }
}

#[test]
fn error_slot_peek_keeps_take_clears() {
    let slot = ErrorSlot::default();
    assert!(slot.peek().is_none());
    slot.set(crate::error::TransportError::Network("offline".to_string()));
    assert!(slot.peek().is_some());
    assert!(slot.take().is_some());
    assert!(slot.peek().is_none());
}

#[test]
fn wav_header_describes_pcm16_mono_at_16_khz() {
    let samples: Vec<i16> = (0..480).map(|n| (n * 13) as i16).collect();
    let wav = super::wav::wrap_pcm16(&samples).expect("wrap");

    assert_eq!(wav.len(), 44 + samples.len() * 2);
    assert_eq!(&wav[0..4], b"RIFF");
    assert_eq!(&wav[8..12], b"WAVE");
    let channels = u16::from_le_bytes([wav[22], wav[23]]);
    let sample_rate = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
    let bits = u16::from_le_bytes([wav[34], wav[35]]);
    assert_eq!(channels, 1);
    assert_eq!(sample_rate, 16_000);
    assert_eq!(bits, 16);
    assert_eq!(&wav[36..40], b"data");
    let data_len = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
    assert_eq!(data_len as usize, samples.len() * 2);
}

#[test]
fn batch_posts_wav_and_surfaces_trimmed_transcript() {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("bind");
    let addr = server.server_addr().to_ip().expect("ip");
    let (seen_tx, seen_rx) = unbounded();
    let server_thread = std::thread::spawn(move || {
        let mut request = server.recv().expect("request");
        let mut body = Vec::new();
        let _ = request.as_reader().read_to_end(&mut body);
        let _ = seen_tx.send((request.url().to_string(), body));
        let _ = request.respond(tiny_http::Response::from_string("  turn left  \n"));
    });

    let (events_tx, events_rx) = unbounded();
    let mut transport =
        BatchTransport::new(&format!("http://{addr}/transcribe"), events_tx).expect("transport");
    let (frames_tx, frames_rx) = unbounded();
    transport.start(frames_rx, &params(1, 16_000)).expect("start");
    assert!(transport.recording());
    for _ in 0..4 {
        frames_tx.send(vec![0.05f32; 1_600]).expect("frame");
    }
    transport.stop();
    assert!(!transport.recording());

    match events_rx.recv_timeout(Duration::from_secs(10)) {
        Ok(EngineEvent::Transcript { generation, text }) => {
            assert_eq!(generation, 1);
            assert_eq!(text, "turn left");
        }
        other => panic!("expected transcript, got {other:?}"),
    }
    let (url, body) = seen_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("request seen");
    assert!(
        url.contains("language=en") && url.contains("project=demo"),
        "url was {url}"
    );
    assert!(body.windows(4).any(|w| w == b"RIFF"), "no wav payload");
    assert!(
        body.windows(13).any(|w| w == b"utterance.wav"),
        "no attachment filename"
    );
    server_thread.join().expect("server thread");
}

#[test]
fn batch_error_status_reports_transcription_failure() {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("bind");
    let addr = server.server_addr().to_ip().expect("ip");
    let server_thread = std::thread::spawn(move || {
        let request = server.recv().expect("request");
        let _ = request.respond(
            tiny_http::Response::from_string("over capacity").with_status_code(503),
        );
    });

    let (events_tx, events_rx) = unbounded();
    let mut transport =
        BatchTransport::new(&format!("http://{addr}/transcribe"), events_tx).expect("transport");
    let (frames_tx, frames_rx) = unbounded();
    transport.start(frames_rx, &params(2, 16_000)).expect("start");
    frames_tx.send(vec![0.05f32; 1_600]).expect("frame");
    transport.stop();

    match events_rx.recv_timeout(Duration::from_secs(10)) {
        Ok(EngineEvent::Failed { generation, error }) => {
            assert_eq!(generation, 2);
            match error {
                crate::error::TransportError::Transcription { status, body } => {
                    assert_eq!(status, 503);
                    assert_eq!(body, "over capacity");
                }
                other => panic!("expected transcription error, got {other}"),
            }
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(transport.last_error().is_some());
    server_thread.join().expect("server thread");
}

#[test]
fn batch_unreachable_endpoint_reports_network_error() {
    let (events_tx, events_rx) = unbounded();
    let mut transport =
        BatchTransport::new("http://127.0.0.1:9/transcribe", events_tx).expect("transport");
    let (frames_tx, frames_rx) = unbounded();
    transport.start(frames_rx, &params(3, 16_000)).expect("start");
    frames_tx.send(vec![0.05f32; 1_600]).expect("frame");
    transport.stop();

    match events_rx.recv_timeout(Duration::from_secs(10)) {
        Ok(EngineEvent::Failed { generation, error }) => {
            assert_eq!(generation, 3);
            assert!(matches!(error, crate::error::TransportError::Network(_)));
        }
        other => panic!("expected network failure, got {other:?}"),
    }
}

#[test]
fn batch_empty_session_skips_the_request() {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("bind");
    let addr = server.server_addr().to_ip().expect("ip");

    let (events_tx, events_rx) = unbounded();
    let mut transport =
        BatchTransport::new(&format!("http://{addr}/transcribe"), events_tx).expect("transport");
    let (_frames_tx, frames_rx) = unbounded::<Frame>();
    transport.start(frames_rx, &params(4, 16_000)).expect("start");
    transport.stop();

    assert!(
        events_rx.recv_timeout(Duration::from_millis(400)).is_err(),
        "no event expected for an empty capture"
    );
    let polled = server
        .recv_timeout(Duration::from_millis(200))
        .expect("poll");
    assert!(polled.is_none(), "no request expected for an empty capture");
}

#[test]
fn stream_ships_priming_then_audio_and_surfaces_transcript() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (uri_tx, uri_rx) = unbounded();
    let (done_tx, done_rx) = unbounded();
    let server_thread = std::thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        let mut socket = tungstenite::accept_hdr(stream, |req: &Request, resp: Response| {
            let _ = uri_tx.send(req.uri().to_string());
            Ok(resp)
        })
        .expect("server handshake");

        // Priming burst first: one flush interval of silence at the target
        // rate, 16-bit mono.
        let priming = expect_binary(&mut socket);
        assert_eq!(priming.len(), 16_000);
        assert!(priming.iter().all(|byte| *byte == 0));

        let chunk = expect_binary(&mut socket);
        assert!(!chunk.is_empty());

        socket
            .send(Message::Text(r#"{"transcription":" turn left "}"#.into()))
            .expect("send transcript");

        // Stop lands as remaining audio, then the zero-length termination
        // frame, then the close handshake.
        loop {
            match socket.read().expect("read") {
                Message::Binary(data) if data.is_empty() => break,
                Message::Binary(_) => {}
                Message::Close(_) => panic!("close arrived before the termination frame"),
                _ => {}
            }
        }
        let _ = done_tx.send(());
        while socket.read().is_ok() {}
    });

    let (events_tx, events_rx) = unbounded();
    let mut transport =
        StreamTransport::new(&format!("ws://{addr}/listen"), events_tx).expect("transport");
    let (frames_tx, frames_rx) = unbounded();
    transport.start(frames_rx, &params(7, 16_000)).expect("start");
    assert!(transport.recording());
    for _ in 0..3 {
        frames_tx.send(vec![0.05f32; 1_600]).expect("frame");
    }

    let uri = uri_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("handshake uri");
    assert!(
        uri.contains("project=demo") && uri.contains("language=en"),
        "uri was {uri}"
    );

    match events_rx.recv_timeout(Duration::from_secs(5)) {
        Ok(EngineEvent::Transcript { generation, text }) => {
            assert_eq!(generation, 7);
            assert_eq!(text, "turn left");
        }
        other => panic!("expected transcript, got {other:?}"),
    }

    transport.stop();
    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("termination frame seen");
    server_thread.join().expect("server thread");
}

#[test]
fn stream_round_trip_preserves_sample_count() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shipped_tx, shipped_rx) = unbounded();
    let server_thread = std::thread::spawn(move || {
        let mut socket = accept_stream(&listener);
        let priming = expect_binary(&mut socket);
        assert!(priming.iter().all(|byte| *byte == 0));
        let mut samples = 0usize;
        loop {
            match socket.read().expect("read") {
                Message::Binary(data) if data.is_empty() => break,
                Message::Binary(data) => samples += data.len() / 2,
                _ => {}
            }
        }
        let _ = shipped_tx.send(samples);
        while socket.read().is_ok() {}
    });

    let (events_tx, _events_rx) = unbounded();
    let mut transport =
        StreamTransport::new(&format!("ws://{addr}/listen"), events_tx).expect("transport");
    let (frames_tx, frames_rx) = unbounded();
    transport.start(frames_rx, &params(9, 44_100)).expect("start");

    // First stretch rides a cadence drain, the rest rides the tail flush.
    frames_tx.send(vec![0.01f32; 4_000]).expect("frame");
    std::thread::sleep(Duration::from_millis(700));
    frames_tx.send(vec![0.01f32; 5_193]).expect("frame");
    transport.stop();

    let shipped = shipped_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("chunks seen") as i64;
    let captured: u64 = 4_000 + 5_193;
    let expected = ((captured * 16_000 + 22_050) / 44_100) as i64;
    assert!(
        (shipped - expected).abs() <= 1,
        "shipped {shipped}, expected {expected}"
    );
    server_thread.join().expect("server thread");
}

#[test]
fn stream_abnormal_close_surfaces_hint() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server_thread = std::thread::spawn(move || {
        let mut socket = accept_stream(&listener);
        let _priming = expect_binary(&mut socket);
        socket
            .close(Some(CloseFrame {
                code: CloseCode::from(1013),
                reason: "try later".into(),
            }))
            .expect("close");
        while socket.read().is_ok() {}
    });

    let (events_tx, events_rx) = unbounded();
    let mut transport =
        StreamTransport::new(&format!("ws://{addr}/listen"), events_tx).expect("transport");
    let (_frames_tx, frames_rx) = unbounded::<Frame>();
    transport.start(frames_rx, &params(3, 16_000)).expect("start");

    match events_rx.recv_timeout(Duration::from_secs(5)) {
        Ok(EngineEvent::Failed { generation, error }) => {
            assert_eq!(generation, 3);
            match error {
                crate::error::TransportError::Stream { code, hint } => {
                    assert_eq!(code, 1013);
                    assert_eq!(hint, "server at capacity");
                }
                other => panic!("expected stream error, got {other}"),
            }
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(transport.last_error().is_some());
    transport.stop();
    server_thread.join().expect("server thread");
}

#[test]
fn client_initiated_stop_is_not_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (tail_tx, tail_rx) = unbounded();
    let server_thread = std::thread::spawn(move || {
        let mut socket = accept_stream(&listener);
        let _priming = expect_binary(&mut socket);
        let mut audio_chunks = 0usize;
        loop {
            match socket.read().expect("read") {
                Message::Binary(data) if data.is_empty() => break,
                Message::Binary(_) => audio_chunks += 1,
                _ => {}
            }
        }
        let _ = tail_tx.send(audio_chunks);
        while socket.read().is_ok() {}
    });

    let (events_tx, events_rx) = unbounded();
    let mut transport =
        StreamTransport::new(&format!("ws://{addr}/listen"), events_tx).expect("transport");
    let (frames_tx, frames_rx) = unbounded();
    transport.start(frames_rx, &params(5, 16_000)).expect("start");
    frames_tx.send(vec![0.05f32; 1_600]).expect("frame");
    transport.stop();

    // The residual audio ships with the tail flush even though no cadence
    // interval elapsed.
    let audio_chunks = tail_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("tail seen");
    assert!(audio_chunks >= 1, "tail flush did not ship residual audio");
    assert!(
        events_rx.recv_timeout(Duration::from_millis(800)).is_err(),
        "client-initiated close must not surface as a failure"
    );
    assert!(transport.last_error().is_none());
    server_thread.join().expect("server thread");
}

#[test]
fn superseded_connection_is_closed_unused() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (accepted_tx, accepted_rx) = bounded::<()>(1);
    let (gate_tx, gate_rx) = bounded::<()>(1);
    let (first_tx, first_rx) = unbounded();
    let server_thread = std::thread::spawn(move || {
        // Hold the first handshake until the second session has started, so
        // its open confirmation arrives under a superseded sequence.
        let (stream, _) = listener.accept().expect("accept first");
        let _ = accepted_tx.send(());
        gate_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("gate released");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        let mut first = tungstenite::accept(stream).expect("first handshake");
        let outcome = match first.read() {
            Ok(Message::Close(_)) => "close".to_string(),
            Ok(other) => format!("unexpected message: {other:?}"),
            Err(err) => format!("error: {err}"),
        };
        let _ = first_tx.send(outcome);

        let mut second = accept_stream(&listener);
        let priming = expect_binary(&mut second);
        assert!(!priming.is_empty());
        while second.read().is_ok() {}
    });

    let (events_tx, events_rx) = unbounded();
    let mut transport =
        StreamTransport::new(&format!("ws://{addr}/listen"), events_tx).expect("transport");
    let (_frames1_tx, frames1_rx) = unbounded::<Frame>();
    transport.start(frames1_rx, &params(1, 16_000)).expect("start first");
    accepted_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("first connection reached the server");

    let (_frames2_tx, frames2_rx) = unbounded::<Frame>();
    transport.start(frames2_rx, &params(2, 16_000)).expect("start second");
    gate_tx.send(()).expect("release gate");

    let outcome = first_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("first connection outcome");
    assert_eq!(
        outcome, "close",
        "superseded connection must close without sending audio"
    );

    transport.stop();
    server_thread.join().expect("server thread");
    assert!(
        events_rx.try_recv().is_err(),
        "silent supersede must not surface events"
    );
}
