//! Test doubles for driving sessions without a camera or a backend.
//!
//! [`ScriptedSource`] replays a fixed list of frames; [`mock_transport`]
//! builds a [`MockTransport`] whose behavior (acks, failures, the end
//! result) is controlled through a [`MockHandle`] while the driver owns
//! the transport itself. Everything here is deterministic so paused-clock
//! tests see the same interleavings every run.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::{Result, SessionError};
use crate::source::{FrameSource, FrameSpec};
use crate::transport::{Transport, TransportEvent};
use crate::types::{Chunk, SessionResult};

/// Frame source that replays a scripted sequence and then runs dry.
///
/// Frame `i` is four copies of the byte `i`, so tests can assert ordering
/// by looking at the first byte of each delivered frame. Once the script
/// is exhausted the source reports not-ready and capture ticks skip it.
pub struct ScriptedSource {
    frames: VecDeque<Vec<u8>>,
    luma: f64,
}

impl ScriptedSource {
    pub fn with_frames(count: usize) -> Self {
        Self { frames: Self::frame_bytes(0..count).into(), luma: 128.0 }
    }

    /// A source that never has a frame, for fail-fast start checks.
    pub fn never_ready() -> Self {
        Self { frames: VecDeque::new(), luma: 128.0 }
    }

    pub fn with_luma(mut self, luma: f64) -> Self {
        self.luma = luma;
        self
    }

    /// The canonical bytes of scripted frames in `range`, for assertions.
    pub fn frame_bytes(range: Range<usize>) -> Vec<Vec<u8>> {
        range.map(|i| vec![i as u8; 4]).collect()
    }
}

#[async_trait::async_trait]
impl FrameSource for ScriptedSource {
    async fn capture_frame(&mut self, _spec: &FrameSpec) -> Result<Vec<u8>> {
        self.frames
            .pop_front()
            .ok_or_else(|| SessionError::encode("scripted source exhausted"))
    }

    fn is_ready(&self) -> bool {
        !self.frames.is_empty()
    }

    async fn sample_luma(&mut self) -> Option<f64> {
        Some(self.luma)
    }
}

/// Deterministic pseudo-random frame payloads for benches and tests.
pub fn synthetic_frames(count: usize, bytes_per_frame: usize) -> Vec<Vec<u8>> {
    let mut state = 0x5eed_cafe_u64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state & 0xFF) as u8
    };
    (0..count)
        .map(|_| (0..bytes_per_frame).map(|_| next()).collect())
        .collect()
}

#[derive(Default)]
struct MockState {
    opened: bool,
    ready: bool,
    auto_ack: bool,
    end_result: Option<SessionResult>,
    fail_open: Option<String>,
    fail_reasons: VecDeque<String>,
    sent: Vec<Chunk>,
    finalize_calls: u32,
    close_calls: u32,
}

/// Builds a transport double plus the handle that scripts and observes it.
///
/// The transport side goes to the driver; the handle stays with the test.
/// Events injected through the handle arrive on the same channel the
/// transport itself reports on, so ordering matches a real transport.
pub fn mock_transport() -> (MockTransport, MockHandle) {
    let state = Arc::new(Mutex::new(MockState::default()));
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let transport = MockTransport {
        state: Arc::clone(&state),
        events_tx: event_tx.clone(),
        events_rx: Some(event_rx),
    };
    (transport, MockHandle { state, events: event_tx })
}

/// In-memory transport double.
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.fail_open.clone() {
            return Err(SessionError::connect_failed("mock://service", reason));
        }
        state.opened = true;
        state.ready = true;
        self.events_rx
            .take()
            .ok_or_else(|| SessionError::invalid_state("open", "already opened"))
    }

    fn is_ready(&self) -> bool {
        self.state.lock().unwrap().ready
    }

    fn send_chunk(&mut self, chunk: Chunk) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.ready {
            return Err(SessionError::invalid_state("send", "not connected"));
        }
        if let Some(reason) = state.fail_reasons.pop_front() {
            let _ = self.events_tx.send(TransportEvent::SendFailed { chunk, reason });
            return Ok(());
        }
        if state.auto_ack {
            let _ = self.events_tx.send(TransportEvent::Ack {
                chunk_seq: chunk.seq,
                received: chunk.frame_count() as u32,
            });
        }
        state.sent.push(chunk);
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.ready {
            return Err(SessionError::invalid_state("finalize", "not connected"));
        }
        state.finalize_calls += 1;
        if let Some(result) = state.end_result.clone() {
            let _ = self.events_tx.send(TransportEvent::Result(Box::new(result)));
        }
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.close_calls += 1;
        state.ready = false;
    }
}

/// Scripting and observation handle for a [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MockHandle {
    /// Injects an inbound event as if the service had sent it.
    pub fn send_event(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Acknowledge every chunk as soon as it is sent, like the polling
    /// strategy's synchronous ack.
    pub fn set_auto_ack(&self, on: bool) {
        self.state.lock().unwrap().auto_ack = on;
    }

    /// The result the mock returns in response to `finalize`.
    pub fn set_end_result(&self, result: SessionResult) {
        self.state.lock().unwrap().end_result = Some(result);
    }

    /// Queues one send failure; each call covers one future `send_chunk`.
    pub fn fail_next_send(&self, reason: &str) {
        self.state.lock().unwrap().fail_reasons.push_back(reason.to_string());
    }

    /// Makes `open` fail with the given reason.
    pub fn fail_open(&self, reason: &str) {
        self.state.lock().unwrap().fail_open = Some(reason.to_string());
    }

    pub fn opened(&self) -> bool {
        self.state.lock().unwrap().opened
    }

    pub fn sent_chunks(&self) -> Vec<Chunk> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn finalize_calls(&self) -> u32 {
        self.state.lock().unwrap().finalize_calls
    }

    pub fn close_calls(&self) -> u32 {
        self.state.lock().unwrap().close_calls
    }
}
