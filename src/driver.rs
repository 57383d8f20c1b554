//! Session driver: the actor task that owns all per-session state.
//!
//! [`SessionDriver::spawn`] starts one task per session. The task owns the
//! frame source, the transport, the pending-frame buffer and every counter,
//! so no locks are needed: capture ticks, assembly ticks, the duration
//! clock, the lighting sampler, inbound transport events and user commands
//! all run through one `select!` loop. Observers get state through watch
//! channels; a cancellation token tears the task down without waiting.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::assembler::ChunkAssembler;
use crate::config::{ASSEMBLY_INTERVAL, CLOCK_POLL_INTERVAL, LIGHTING_POLL_INTERVAL, SessionConfig};
use crate::source::{FrameSource, FrameSpec, lighting_ok};
use crate::transport::{Transport, TransportEvent};
use crate::types::{Chunk, SessionPhase, SessionResult, SessionSnapshot};

/// Delivery attempts for leftover frames at session end before they are
/// dropped and finalization proceeds without them.
const MAX_DRAIN_ATTEMPTS: u32 = 2;

/// Commands accepted by a running session task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// User-initiated stop: tear the transport down immediately. No result
    /// is expected, unlike the timer-driven end of capture.
    Stop,
}

/// Handles returned by [`SessionDriver::spawn`].
pub struct DriverChannels {
    /// Receiver for live session snapshots.
    pub snapshots: watch::Receiver<SessionSnapshot>,
    /// Receiver for the terminal result, set at most once per session.
    pub result: watch::Receiver<Option<Arc<SessionResult>>>,
    /// Sender for user commands.
    pub commands: mpsc::UnboundedSender<Command>,
    /// Cancellation token for immediate teardown.
    pub cancel: CancellationToken,
}

/// Spawns and manages session tasks.
pub struct SessionDriver;

impl SessionDriver {
    /// Spawns the session task for the given source and transport.
    ///
    /// The task opens the transport, runs capture/assembly/clock timers
    /// until the session reaches a terminal phase, then closes the
    /// transport. Dropping every channel in the returned [`DriverChannels`]
    /// does not stop the task; cancel the token to do that.
    pub fn spawn<S, T>(config: SessionConfig, source: S, transport: T) -> DriverChannels
    where
        S: FrameSource,
        T: Transport,
    {
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let (result_tx, result_rx) = watch::channel(None);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = SessionTask {
            config,
            source,
            transport,
            assembler: ChunkAssembler::new(0, 0, 1),
            phase: SessionPhase::Idle,
            started_at: Instant::now(),
            seconds_elapsed: 0,
            frames_captured: 0,
            frames_sent: 0,
            chunks_sent: 0,
            sent_sizes: BTreeMap::new(),
            face_detected: None,
            lighting_ok: true,
            last_error: None,
            finalize_sent: false,
            drain_failures: 0,
            snapshot_tx,
            result_tx,
        };

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            task.run(command_rx, task_cancel).await;
        });

        DriverChannels { snapshots: snapshot_rx, result: result_rx, commands: command_tx, cancel }
    }
}

struct SessionTask<S, T> {
    config: SessionConfig,
    source: S,
    transport: T,
    assembler: ChunkAssembler,
    phase: SessionPhase,
    started_at: Instant,
    seconds_elapsed: u32,
    frames_captured: u64,
    frames_sent: u64,
    chunks_sent: u64,
    /// Frame counts of dispatched-but-unacked chunks, keyed by sequence.
    sent_sizes: BTreeMap<u64, u64>,
    face_detected: Option<bool>,
    lighting_ok: bool,
    last_error: Option<String>,
    finalize_sent: bool,
    drain_failures: u32,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    result_tx: watch::Sender<Option<Arc<SessionResult>>>,
}

impl<S, T> SessionTask<S, T>
where
    S: FrameSource,
    T: Transport,
{
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        if let Err(err) = self.config.validate() {
            self.fail(err.to_string());
            self.publish();
            return;
        }
        // fail fast before any network resources are allocated
        if !self.source.is_ready() {
            self.fail("frame source is not ready");
            self.publish();
            return;
        }

        let mut events = match self.transport.open().await {
            Ok(events) => events,
            Err(err) => {
                self.fail(err.to_string());
                self.publish();
                return;
            }
        };

        self.assembler = ChunkAssembler::new(
            self.config.resolution.width,
            self.config.resolution.height,
            self.config.max_chunk_size,
        );
        self.phase = SessionPhase::Capturing;
        self.started_at = Instant::now();
        info!(
            session_id = %self.config.session_id,
            seconds = self.config.capture_seconds,
            fps = self.config.target_fps,
            "session capturing"
        );
        self.publish();

        let capture_period = self.config.capture_interval();
        let mut capture = time::interval_at(Instant::now() + capture_period, capture_period);
        let mut assembly = time::interval_at(Instant::now() + ASSEMBLY_INTERVAL, ASSEMBLY_INTERVAL);
        let mut clock = time::interval_at(Instant::now() + CLOCK_POLL_INTERVAL, CLOCK_POLL_INTERVAL);
        let mut lighting =
            time::interval_at(Instant::now() + LIGHTING_POLL_INTERVAL, LIGHTING_POLL_INTERVAL);
        for interval in [&mut capture, &mut assembly, &mut clock, &mut lighting] {
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("session task cancelled");
                    break;
                }
                command = commands.recv() => match command {
                    Some(Command::Stop) => self.handle_stop().await,
                    None => {
                        debug!("command channel closed, stopping session");
                        break;
                    }
                },
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => self.fail("transport event channel closed"),
                },
                _ = capture.tick(), if self.phase == SessionPhase::Capturing => {
                    self.capture_frame().await;
                }
                _ = assembly.tick() => self.assembly_tick(),
                _ = clock.tick(), if self.phase == SessionPhase::Capturing => self.clock_tick(),
                _ = lighting.tick(), if self.phase == SessionPhase::Capturing => {
                    self.sample_lighting().await;
                }
            }

            if self.should_finalize() {
                self.send_finalize();
            }
            self.publish();
            if !self.phase.is_active() {
                break;
            }
        }

        self.transport.close().await;
        info!(
            phase = %self.phase,
            frames_captured = self.frames_captured,
            frames_sent = self.frames_sent,
            chunks_sent = self.chunks_sent,
            "session task ended"
        );
    }

    /// One capture tick: sample a frame unless gated.
    ///
    /// Skipped samples are lost, not deferred; that bounds memory growth
    /// under backpressure at the cost of effective frame rate. A failed
    /// encode is likewise skipped, since the estimate is statistical over
    /// many frames.
    async fn capture_frame(&mut self) {
        if self.assembler.is_backpressured() {
            trace!(lag = self.assembler.ack_lag(), "capture gated by ack lag");
            return;
        }
        if !self.source.is_ready() {
            trace!("frame source not ready, sample skipped");
            return;
        }

        let spec = FrameSpec {
            width: self.config.resolution.width,
            height: self.config.resolution.height,
            quality: self.config.clamped_quality(),
        };
        match self.source.capture_frame(&spec).await {
            Ok(frame) => {
                self.assembler.push_frame(frame);
                self.frames_captured += 1;
            }
            Err(err) => debug!(error = %err, "frame encode failed, sample skipped"),
        }
    }

    fn assembly_tick(&mut self) {
        match self.phase {
            // one chunk per tick; assembly rate is fixed, chunk size varies
            SessionPhase::Capturing => {
                self.try_send_chunk();
            }
            SessionPhase::Draining => self.flush_pending(),
            _ => {}
        }
    }

    /// Assembles and dispatches one chunk if the transport can take it.
    /// Returns whether a chunk went out.
    fn try_send_chunk(&mut self) -> bool {
        if !self.transport.is_ready() || !self.assembler.has_pending() {
            return false;
        }
        let Some(chunk) = self.assembler.assemble() else {
            return false;
        };
        let seq = chunk.seq;
        let frames = chunk.frame_count() as u64;
        match self.transport.send_chunk(chunk) {
            Ok(()) => {
                self.sent_sizes.insert(seq, frames);
                debug!(chunk_seq = seq, frames, "chunk dispatched");
                true
            }
            Err(err) => {
                // is_ready held just above, so the connection is already
                // gone; the transport's closed event ends the session
                self.fail(err.to_string());
                false
            }
        }
    }

    /// Sends pending frames as fast as the transport accepts them.
    fn flush_pending(&mut self) {
        while self.assembler.has_pending() && self.transport.is_ready() {
            if !self.try_send_chunk() {
                break;
            }
        }
    }

    fn clock_tick(&mut self) {
        self.seconds_elapsed = self.started_at.elapsed().as_secs() as u32;
        if self.seconds_elapsed >= self.config.capture_seconds {
            info!(seconds = self.seconds_elapsed, "capture window elapsed, draining");
            self.phase = SessionPhase::Draining;
            self.flush_pending();
        }
    }

    async fn sample_lighting(&mut self) {
        if let Some(luma) = self.source.sample_luma().await {
            let ok = lighting_ok(luma);
            if ok != self.lighting_ok {
                debug!(luma, ok, "lighting changed");
            }
            self.lighting_ok = ok;
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Ack { chunk_seq, received } => {
                self.assembler.record_ack(chunk_seq);
                self.credit_acked();
                self.drain_failures = 0;
                trace!(chunk_seq, received, lag = self.assembler.ack_lag(), "ack recorded");
                if self.phase == SessionPhase::Draining {
                    self.flush_pending();
                }
            }
            TransportEvent::FaceSignal { face_detected } => {
                self.face_detected = Some(face_detected);
            }
            TransportEvent::Progress { stage } => debug!(stage = %stage, "service progress"),
            TransportEvent::Result(result) => self.finish(*result),
            TransportEvent::ServerError { message } => {
                // service-reported errors are surfaced but do not end the
                // session unless the connection itself closes
                warn!(message = %message, "service reported an error");
                self.last_error = Some(message);
            }
            TransportEvent::SendFailed { chunk, reason } => self.handle_send_failed(chunk, reason),
            TransportEvent::FinalizeFailed { reason } => {
                self.fail(format!("finalize failed: {reason}"));
            }
            TransportEvent::Closed { reason } => {
                self.fail(reason.unwrap_or_else(|| "connection closed".to_string()));
            }
        }
    }

    /// Moves acked chunks out of the in-flight map and into the sent
    /// counters. Acks are cumulative, so everything at or below the
    /// watermark is covered.
    fn credit_acked(&mut self) {
        let Some(acked) = self.assembler.highest_acked() else {
            return;
        };
        let remaining = self.sent_sizes.split_off(&acked.saturating_add(1));
        let covered = std::mem::replace(&mut self.sent_sizes, remaining);
        self.chunks_sent += covered.len() as u64;
        self.frames_sent += covered.values().sum::<u64>();
    }

    fn handle_send_failed(&mut self, chunk: Chunk, reason: String) {
        warn!(
            chunk_seq = chunk.seq,
            frames = chunk.frame_count(),
            error = %reason,
            "chunk delivery failed, requeueing frames"
        );
        self.sent_sizes.remove(&chunk.seq);
        self.assembler.requeue_front(chunk);
        self.last_error = Some(reason);

        if self.phase == SessionPhase::Draining {
            self.drain_failures += 1;
            if self.drain_failures >= MAX_DRAIN_ATTEMPTS {
                let dropped = self.assembler.discard_pending();
                warn!(dropped, "drain attempts exhausted, dropping remaining frames");
            } else {
                self.flush_pending();
            }
        }
    }

    fn finish(&mut self, result: SessionResult) {
        let result = result.with_derived_vitals();
        info!(bpm = ?result.bpm, quality = %result.quality, "session result received");
        let _ = self.result_tx.send(Some(Arc::new(result)));
        self.phase = SessionPhase::Finalized;
    }

    /// End-of-capture finalization gate: everything flushed and the
    /// transport free to take the end signal.
    fn should_finalize(&self) -> bool {
        self.phase == SessionPhase::Draining
            && !self.finalize_sent
            && !self.assembler.has_pending()
            && self.transport.is_ready()
    }

    fn send_finalize(&mut self) {
        match self.transport.finalize() {
            Ok(()) => {
                self.finalize_sent = true;
                info!("end of capture signalled");
            }
            Err(err) => self.fail(err.to_string()),
        }
    }

    /// User stop: no result is expected, so the transport closes right away
    /// and pending frames are dropped.
    async fn handle_stop(&mut self) {
        let dropped = self.assembler.discard_pending();
        info!(dropped, "session stopped by user");
        self.transport.close().await;
        self.phase = SessionPhase::Idle;
    }

    fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(error = %reason, "session failed");
        self.last_error = Some(reason);
        self.phase = SessionPhase::Error;
    }

    fn publish(&self) {
        let _ = self.snapshot_tx.send(SessionSnapshot {
            phase: self.phase,
            seconds_elapsed: self.seconds_elapsed,
            frames_captured: self.frames_captured,
            frames_sent: self.frames_sent,
            chunks_sent: self.chunks_sent,
            last_acked_seq: self.assembler.highest_acked(),
            pending_frames: self.assembler.pending_frames(),
            face_detected: self.face_detected,
            lighting_ok: self.lighting_ok,
            last_error: self.last_error.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedSource, mock_transport};
    use crate::types::SignalQuality;

    fn config(capture_seconds: u32, target_fps: u32, max_chunk_size: usize) -> SessionConfig {
        let mut config = SessionConfig::new("test-session");
        config.capture_seconds = capture_seconds;
        config.target_fps = target_fps;
        config.max_chunk_size = max_chunk_size;
        config
    }

    async fn wait_for_result(
        channels: &mut DriverChannels,
    ) -> Option<Arc<SessionResult>> {
        loop {
            if let Some(result) = channels.result.borrow_and_update().clone() {
                return Some(result);
            }
            if channels.result.changed().await.is_err() {
                return None;
            }
        }
    }

    async fn settle() {
        // lets the driver task run its queued arms under paused time
        time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn polling_style_session_sends_chunks_then_finalizes() {
        let (transport, handle) = mock_transport();
        handle.set_auto_ack(true);
        handle.set_end_result(SessionResult {
            bpm: Some(71.0),
            confidence: 0.82,
            quality: SignalQuality::Good,
            ..SessionResult::default()
        });

        let mut channels = SessionDriver::spawn(
            config(2, 10, 5),
            ScriptedSource::with_frames(8),
            transport,
        );

        let result = wait_for_result(&mut channels).await.unwrap();
        assert_eq!(result.bpm, Some(71.0));
        assert!(result.breathing_rate_brpm.is_some(), "derived vitals filled in");

        let sent = handle.sent_chunks();
        assert_eq!(sent.len(), 2, "two assembly windows, two chunks");
        assert!(sent.iter().all(|c| c.frame_count() <= 5));
        assert_eq!(sent[0].frame_count() + sent[1].frame_count(), 8);
        assert_eq!(sent[0].seq, 0);
        assert_eq!(sent[1].seq, 1);
        assert_eq!(handle.finalize_calls(), 1);

        let snapshot = channels.snapshots.borrow().clone();
        assert_eq!(snapshot.phase, SessionPhase::Finalized);
        assert_eq!(snapshot.frames_captured, 8);
        assert_eq!(snapshot.frames_sent, 8, "every captured frame was delivered");
        assert_eq!(snapshot.chunks_sent, 2);
        assert_eq!(snapshot.last_acked_seq, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_requeues_frames_in_order_under_a_new_seq() {
        let (transport, handle) = mock_transport();
        handle.set_auto_ack(true);
        handle.set_end_result(SessionResult::default());
        handle.fail_next_send("connect refused");

        let mut channels = SessionDriver::spawn(
            config(2, 10, 5),
            ScriptedSource::with_frames(8),
            transport,
        );
        wait_for_result(&mut channels).await.unwrap();

        let sent = handle.sent_chunks();
        // seq 0 failed; its five frames must lead the next chunk unchanged
        assert_eq!(sent[0].seq, 1);
        assert_eq!(sent[0].frames, ScriptedSource::frame_bytes(0..5));
        let delivered: Vec<u8> = sent
            .iter()
            .flat_map(|c| c.frames.iter().map(|f| f[0]))
            .collect();
        assert_eq!(delivered, (0..8).collect::<Vec<u8>>(), "capture order preserved");

        let seqs: Vec<u64> = sent.iter().map(|c| c.seq).collect();
        let mut sorted = seqs.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(seqs, sorted, "sequence numbers strictly increase, none reused");

        let snapshot = channels.snapshots.borrow().clone();
        assert_eq!(snapshot.frames_sent, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_watermark_never_regresses() {
        let (transport, handle) = mock_transport();
        let mut channels = SessionDriver::spawn(
            config(30, 8, 5),
            ScriptedSource::with_frames(4),
            transport,
        );
        settle().await;

        handle.send_event(TransportEvent::Ack { chunk_seq: 3, received: 5 });
        settle().await;
        assert_eq!(channels.snapshots.borrow().last_acked_seq, Some(3));

        handle.send_event(TransportEvent::Ack { chunk_seq: 1, received: 5 });
        settle().await;
        assert_eq!(channels.snapshots.borrow().last_acked_seq, Some(3));

        channels.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn backpressure_pauses_capture_until_acks_catch_up() {
        let (transport, handle) = mock_transport();
        let mut channels = SessionDriver::spawn(
            config(60, 10, 1),
            ScriptedSource::with_frames(500),
            transport,
        );

        // three one-frame chunks go out unacked, so the lag passes the
        // threshold and capture stalls
        time::sleep(Duration::from_secs(8)).await;
        let stalled_at = channels.snapshots.borrow().frames_captured;
        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(
            channels.snapshots.borrow().frames_captured,
            stalled_at,
            "capture must pause while the lag exceeds the threshold"
        );

        handle.send_event(TransportEvent::Ack { chunk_seq: 50, received: 1 });
        time::sleep(Duration::from_secs(2)).await;
        assert!(
            channels.snapshots.borrow().frames_captured > stalled_at,
            "capture resumes once acks catch up"
        );

        channels.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn user_stop_closes_transport_without_result() {
        let (transport, handle) = mock_transport();
        handle.set_auto_ack(true);
        let mut channels = SessionDriver::spawn(
            config(30, 8, 5),
            ScriptedSource::with_frames(100),
            transport,
        );
        time::sleep(Duration::from_secs(3)).await;

        channels.commands.send(Command::Stop).unwrap();
        settle().await;

        let snapshot = channels.snapshots.borrow().clone();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert_eq!(snapshot.pending_frames, 0);
        assert!(channels.result.borrow().is_none(), "user stop expects no result");
        assert_eq!(handle.finalize_calls(), 0);
        assert!(handle.close_calls() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_loss_while_capturing_is_fatal() {
        let (transport, handle) = mock_transport();
        let mut channels = SessionDriver::spawn(
            config(30, 8, 5),
            ScriptedSource::with_frames(100),
            transport,
        );
        settle().await;

        handle.send_event(TransportEvent::Closed { reason: Some("socket reset".to_string()) });
        settle().await;

        let snapshot = channels.snapshots.borrow().clone();
        assert_eq!(snapshot.phase, SessionPhase::Error);
        assert_eq!(snapshot.last_error.as_deref(), Some("socket reset"));
        assert!(channels.result.borrow().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_is_surfaced_but_not_fatal() {
        let (transport, handle) = mock_transport();
        handle.set_auto_ack(true);
        let mut channels = SessionDriver::spawn(
            config(30, 10, 5),
            ScriptedSource::with_frames(200),
            transport,
        );
        settle().await;

        handle.send_event(TransportEvent::ServerError {
            message: "face not visible".to_string(),
        });
        settle().await;

        let snapshot = channels.snapshots.borrow().clone();
        assert_eq!(snapshot.phase, SessionPhase::Capturing);
        assert_eq!(snapshot.last_error.as_deref(), Some("face not visible"));

        let before = snapshot.frames_captured;
        time::sleep(Duration::from_secs(2)).await;
        assert!(
            channels.snapshots.borrow().frames_captured > before,
            "capture continues after a service error"
        );

        channels.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_after_bounded_attempts() {
        let (transport, handle) = mock_transport();
        handle.set_end_result(SessionResult::default());
        for _ in 0..8 {
            handle.fail_next_send("backend unreachable");
        }

        let mut channels = SessionDriver::spawn(
            config(1, 10, 10),
            ScriptedSource::with_frames(5),
            transport,
        );

        let result = wait_for_result(&mut channels).await;
        assert!(result.is_some(), "session still finalizes after dropping frames");

        let snapshot = channels.snapshots.borrow().clone();
        assert_eq!(snapshot.phase, SessionPhase::Finalized);
        assert_eq!(snapshot.pending_frames, 0);
        assert_eq!(snapshot.frames_sent, 0, "nothing was ever delivered");
        assert!(snapshot.last_error.is_some());
        assert_eq!(handle.finalize_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_open_failure_sets_error_phase() {
        let (transport, handle) = mock_transport();
        handle.fail_open("connection refused");

        let mut channels = SessionDriver::spawn(
            config(25, 8, 10),
            ScriptedSource::with_frames(10),
            transport,
        );
        settle().await;

        let snapshot = channels.snapshots.borrow().clone();
        assert_eq!(snapshot.phase, SessionPhase::Error);
        assert!(snapshot.last_error.unwrap().contains("connection refused"));
        assert!(channels.result.borrow().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unready_source_fails_before_opening_the_transport() {
        let (transport, handle) = mock_transport();
        let mut channels = SessionDriver::spawn(
            config(25, 8, 10),
            ScriptedSource::never_ready(),
            transport,
        );
        settle().await;

        assert_eq!(channels.snapshots.borrow().phase, SessionPhase::Error);
        assert!(!handle.opened(), "no network resources before the source check");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_all_timers() {
        let (transport, handle) = mock_transport();
        handle.set_auto_ack(true);
        let channels = SessionDriver::spawn(
            config(30, 10, 5),
            ScriptedSource::with_frames(500),
            transport,
        );
        time::sleep(Duration::from_secs(2)).await;

        channels.cancel.cancel();
        settle().await;
        let chunks_at_cancel = handle.sent_chunks().len();
        let frames_at_cancel = channels.snapshots.borrow().frames_captured;

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.sent_chunks().len(), chunks_at_cancel, "no sends after cancel");
        assert_eq!(
            channels.snapshots.borrow().frames_captured,
            frames_at_cancel,
            "no captures after cancel"
        );
        assert!(handle.close_calls() >= 1);
    }
}
