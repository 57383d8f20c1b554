//! Pending-frame buffer and chunk assembly.
//!
//! Captured frames land here until an assembly tick drains up to
//! `max_chunk_size` of them into a [`Chunk`] with the next sequence number.
//! The assembler also tracks the highest cumulative ack from the service,
//! which drives the backpressure gate: capture pauses while more than
//! [`MAX_ACK_LAG`] chunks are unacknowledged.
//!
//! One assembler per session. A new session gets a fresh instance, so
//! sequence numbers always start at zero.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::Chunk;

/// Most unacknowledged chunks allowed before capture is gated.
pub const MAX_ACK_LAG: u64 = 2;

struct PendingFrame {
    ts_ms: u64,
    bytes: Vec<u8>,
}

/// Accumulates frames and cuts them into sequenced chunks.
pub struct ChunkAssembler {
    pending: VecDeque<PendingFrame>,
    next_seq: u64,
    highest_acked: Option<u64>,
    width: u32,
    height: u32,
    max_chunk_size: usize,
}

impl ChunkAssembler {
    pub fn new(width: u32, height: u32, max_chunk_size: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            next_seq: 0,
            highest_acked: None,
            width,
            height,
            max_chunk_size: max_chunk_size.max(1),
        }
    }

    /// Appends a captured frame, stamped with the current wall-clock time.
    pub fn push_frame(&mut self, bytes: Vec<u8>) {
        self.pending.push_back(PendingFrame { ts_ms: now_ms(), bytes });
    }

    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Sequence number the next assembled chunk will carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn highest_acked(&self) -> Option<u64> {
        self.highest_acked
    }

    /// Records a cumulative ack. Acks never move backwards, so an
    /// out-of-order delivery of an older ack is a no-op.
    pub fn record_ack(&mut self, seq: u64) {
        self.highest_acked = Some(self.highest_acked.map_or(seq, |prev| prev.max(seq)));
    }

    /// Number of chunks produced but not yet acknowledged.
    pub fn ack_lag(&self) -> u64 {
        let acked_through = self.highest_acked.map_or(0, |seq| seq.saturating_add(1));
        self.next_seq.saturating_sub(acked_through)
    }

    /// Whether capture should pause until the service catches up.
    pub fn is_backpressured(&self) -> bool {
        self.ack_lag() > MAX_ACK_LAG
    }

    /// Drains up to `max_chunk_size` pending frames into the next chunk.
    ///
    /// Returns `None` when nothing is pending; empty chunks are never
    /// produced. The chunk timestamp is the capture time of its first frame.
    pub fn assemble(&mut self) -> Option<Chunk> {
        if self.pending.is_empty() {
            return None;
        }

        let take = self.max_chunk_size.min(self.pending.len());
        let mut frames = Vec::with_capacity(take);
        let mut ts_start_ms = 0;
        for (i, frame) in self.pending.drain(..take).enumerate() {
            if i == 0 {
                ts_start_ms = frame.ts_ms;
            }
            frames.push(frame.bytes);
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        Some(Chunk { seq, ts_start_ms, width: self.width, height: self.height, frames })
    }

    /// Puts a failed chunk's frames back at the front of the buffer.
    ///
    /// The chunk's sequence number stays consumed; the frames go out again
    /// under whatever sequence the next assembly produces. Frame order is
    /// preserved ahead of anything captured since.
    pub fn requeue_front(&mut self, chunk: Chunk) {
        let ts_ms = chunk.ts_start_ms;
        for bytes in chunk.frames.into_iter().rev() {
            self.pending.push_front(PendingFrame { ts_ms, bytes });
        }
    }

    /// Drops everything still pending and reports how many frames were lost.
    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
