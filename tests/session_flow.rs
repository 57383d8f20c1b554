//! End-to-end session tests over a real WebSocket connection.
//!
//! Each test runs the public controller API against an in-process
//! estimation service stub: a tokio-tungstenite acceptor that acks every
//! chunk, records what it saw, and answers the end marker with a result.
//! Frames come from the built-in synthetic source, so the full pipeline
//! runs on wall-clock timers with nothing mocked below the socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use pulsecap::protocol::ChunkMessage;
use pulsecap::{
    Pulsecap, Resolution, SessionConfig, SessionError, SessionPhase, SessionResult, SignalQuality,
    SyntheticSource, WireFormat,
};

/// Everything one connection delivered to the service stub.
#[derive(Debug, Default)]
struct ServiceLog {
    chunks: Vec<ChunkMessage>,
    binary_chunks: usize,
    end_seen: bool,
}

/// Accepts one connection, acks every chunk and answers `end` with
/// `result`. The log resolves when the connection goes away.
async fn spawn_ack_service(result: Value) -> (SocketAddr, oneshot::Receiver<ServiceLog>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind service stub");
    let addr = listener.local_addr().expect("stub address");
    let (log_tx, log_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept session connection");
        let mut socket =
            tokio_tungstenite::accept_async(stream).await.expect("websocket handshake");
        let mut log = ServiceLog::default();

        while let Some(message) = socket.next().await {
            let message = match message {
                Ok(message) => message,
                Err(_) => break,
            };
            match message {
                Message::Text(text) => {
                    let value: Value = serde_json::from_str(&text).expect("client sent valid JSON");
                    if value["type"] == "end" {
                        log.end_seen = true;
                        let reply = Message::text(result.to_string());
                        socket.send(reply).await.expect("send result");
                        let _ = socket.close(None).await;
                        break;
                    }
                    let chunk: ChunkMessage =
                        serde_json::from_value(value).expect("chunk-shaped message");
                    ack(&mut socket, &mut log, chunk).await;
                }
                Message::Binary(bytes) => {
                    let chunk: ChunkMessage =
                        rmp_serde::from_slice(&bytes).expect("msgpack chunk message");
                    log.binary_chunks += 1;
                    ack(&mut socket, &mut log, chunk).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        let _ = log_tx.send(log);
    });

    (addr, log_rx)
}

async fn ack(
    socket: &mut WebSocketStream<TcpStream>,
    log: &mut ServiceLog,
    chunk: ChunkMessage,
) {
    let reply = json!({ "type": "ack", "chunk_seq": chunk.chunk_seq, "received": chunk.n });
    log.chunks.push(chunk);
    socket.send(Message::text(reply.to_string())).await.expect("send ack");

    // push the per-chunk quality signal the service emits alongside acks
    if log.chunks.len() == 1 {
        let signal = json!({ "type": "chunk_signal", "face_detected": true });
        socket.send(Message::text(signal.to_string())).await.expect("send signal");
    }
}

/// Accepts one connection, reads a single message, then drops the socket
/// without a close handshake.
async fn spawn_drop_service() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind service stub");
    let addr = listener.local_addr().expect("stub address");

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept session connection");
        let mut socket =
            tokio_tungstenite::accept_async(stream).await.expect("websocket handshake");
        let _ = socket.next().await;
        // dropped here: no close frame, the client sees a dead connection
    });

    addr
}

/// A one-second session against a tiny frame geometry keeps each test
/// around a second of wall clock.
fn short_config() -> SessionConfig {
    let mut config = SessionConfig::new("flow-test");
    config.capture_seconds = 1;
    config.target_fps = 5;
    config.resolution = Resolution::new(64, 48);
    config.max_chunk_size = 10;
    config
}

fn good_result() -> Value {
    json!({
        "bpm": 72.0,
        "confidence": 0.9,
        "quality": "good",
        "duration_s": 1.0,
        "frames_received": 5,
        "face_detect_rate": 1.0,
        "snr_db": 5.5
    })
}

#[tokio::test]
async fn streaming_json_session_delivers_every_frame_and_finalizes() {
    let _ = tracing_subscriber::fmt::try_init();
    let (addr, log_rx) = spawn_ack_service(good_result()).await;

    let mut session = Pulsecap::streaming(
        short_config(),
        SyntheticSource::new(),
        &format!("http://{addr}"),
        WireFormat::Json,
    );
    session.start().expect("session starts");

    let result: Arc<SessionResult> = timeout(Duration::from_secs(10), session.wait_for_result())
        .await
        .expect("session finished in time")
        .expect("session succeeded");

    assert_eq!(result.bpm, Some(72.0));
    assert_eq!(result.quality, SignalQuality::Good);
    assert!(result.breathing_rate_brpm.is_some(), "derived vitals filled in");
    assert_eq!(session.phase(), SessionPhase::Finalized);

    let snapshot = session.snapshot();
    assert!(snapshot.frames_captured > 0);
    assert_eq!(snapshot.frames_sent, snapshot.frames_captured, "every frame delivered");
    assert_eq!(snapshot.face_detected, Some(true), "service signal reached the snapshot");

    let log = timeout(Duration::from_secs(5), log_rx)
        .await
        .expect("service stub finished")
        .expect("service stub logged");
    assert!(log.end_seen, "end marker sent after the last chunk");
    assert!(!log.chunks.is_empty());
    assert_eq!(snapshot.chunks_sent, log.chunks.len() as u64);

    let delivered: u64 = log.chunks.iter().map(|c| u64::from(c.n)).sum();
    assert_eq!(delivered, snapshot.frames_captured);
    for (i, chunk) in log.chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_seq, i as u64, "sequence numbers dense from zero");
        assert_eq!(chunk.frames.len(), chunk.n as usize);
        assert_eq!((chunk.width, chunk.height), (64, 48));
        for frame in &chunk.frames {
            assert!(frame.starts_with(&[0xFF, 0xD8]), "frames survive the base64 hop");
        }
    }
}

#[tokio::test]
async fn streaming_messagepack_session_sends_binary_chunks_and_text_end() {
    let _ = tracing_subscriber::fmt::try_init();
    let (addr, log_rx) = spawn_ack_service(good_result()).await;

    let mut session = Pulsecap::streaming(
        short_config(),
        SyntheticSource::new(),
        &format!("http://{addr}"),
        WireFormat::MessagePack,
    );
    session.start().expect("session starts");

    let result = timeout(Duration::from_secs(10), session.wait_for_result())
        .await
        .expect("session finished in time")
        .expect("session succeeded");
    assert_eq!(result.bpm, Some(72.0));

    let log = timeout(Duration::from_secs(5), log_rx)
        .await
        .expect("service stub finished")
        .expect("service stub logged");
    assert!(!log.chunks.is_empty());
    assert_eq!(log.binary_chunks, log.chunks.len(), "every chunk travels as binary");
    assert!(log.end_seen, "the end marker is still JSON text");

    let delivered: u64 = log.chunks.iter().map(|c| u64::from(c.n)).sum();
    assert_eq!(delivered, session.snapshot().frames_captured);
    for frame in log.chunks.iter().flat_map(|c| c.frames.iter()) {
        assert!(frame.starts_with(&[0xFF, 0xD8]), "raw bytes survive the msgpack hop");
    }
}

#[tokio::test]
async fn user_stop_closes_the_connection_without_an_end_marker() {
    let (addr, log_rx) = spawn_ack_service(good_result()).await;

    let mut config = short_config();
    config.capture_seconds = 30;
    let mut session = Pulsecap::streaming(
        config,
        SyntheticSource::new(),
        &format!("http://{addr}"),
        WireFormat::Json,
    );
    session.start().expect("session starts");
    tokio::time::sleep(Duration::from_millis(400)).await;

    session.stop().expect("stop accepted");
    let err = timeout(Duration::from_secs(5), session.wait_for_result())
        .await
        .expect("stop settled in time")
        .expect_err("a stopped session has no result");
    assert!(matches!(err, SessionError::Failed { .. }));
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert!(session.result().is_none());

    let log = timeout(Duration::from_secs(5), log_rx)
        .await
        .expect("service stub finished")
        .expect("service stub logged");
    assert!(!log.end_seen, "user stop must not look like end of capture");
}

#[tokio::test]
async fn connection_drop_mid_session_is_fatal() {
    let _ = tracing_subscriber::fmt::try_init();
    let addr = spawn_drop_service().await;

    let mut config = short_config();
    config.capture_seconds = 30;
    let mut session = Pulsecap::streaming(
        config,
        SyntheticSource::new(),
        &format!("http://{addr}"),
        WireFormat::Json,
    );
    session.start().expect("session starts");

    let err = timeout(Duration::from_secs(10), session.wait_for_result())
        .await
        .expect("failure surfaced in time")
        .expect_err("a dead connection ends the session");
    assert!(matches!(err, SessionError::Failed { .. }));
    assert_eq!(session.phase(), SessionPhase::Error);
    assert!(session.snapshot().last_error.is_some());
}

#[tokio::test]
async fn refused_connection_fails_the_session_at_start() {
    // port 9 is the discard service; nothing listens there in CI
    let mut session = Pulsecap::streaming(
        short_config(),
        SyntheticSource::new(),
        "http://127.0.0.1:9",
        WireFormat::Json,
    );
    session.start().expect("start itself is not the failure point");

    let err = timeout(Duration::from_secs(10), session.wait_for_result())
        .await
        .expect("failure surfaced in time")
        .expect_err("no service to connect to");
    assert!(matches!(err, SessionError::Failed { .. }));
    assert_eq!(session.phase(), SessionPhase::Error);
}

#[tokio::test]
#[ignore = "needs a running estimation service on localhost:8000"]
async fn live_streaming_session() -> anyhow::Result<()> {
    let api = "http://localhost:8000/api";
    let config =
        Pulsecap::negotiate(api, true).await.context("negotiating with the live service")?;
    let mut session = Pulsecap::streaming(config, SyntheticSource::new(), api, WireFormat::Json);
    session.start()?;

    let result = session.wait_for_result().await.context("waiting for the live result")?;
    println!("live streaming result: bpm={:?} quality={}", result.bpm, result.quality);
    Ok(())
}

#[tokio::test]
#[ignore = "needs a running estimation service on localhost:8000"]
async fn live_polling_session() -> anyhow::Result<()> {
    let api = "http://localhost:8000/api";
    let config =
        Pulsecap::negotiate(api, true).await.context("negotiating with the live service")?;
    let mut session = Pulsecap::polling(config, SyntheticSource::new(), api)
        .context("building the polling session")?;
    session.start()?;

    let result = session.wait_for_result().await.context("waiting for the live result")?;
    println!("live polling result: bpm={:?} quality={}", result.bpm, result.quality);
    Ok(())
}
