//! Sequence-numbered frame batches.

/// A batch of compressed frames sent to the service as one unit.
///
/// Sequence numbers start at 0, increase strictly, and are never reused
/// within a session, even when the frames of a failed send are requeued
/// and travel again under a later number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Per-session sequence number, assigned at assembly time.
    pub seq: u64,
    /// Epoch milliseconds of the oldest frame in the chunk.
    pub ts_start_ms: u64,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Compressed frames, oldest first. Order is preserved end-to-end.
    pub frames: Vec<Vec<u8>>,
}

impl Chunk {
    /// Number of frames in this chunk.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Total compressed payload size in bytes, excluding envelope fields.
    pub fn payload_bytes(&self) -> usize {
        self.frames.iter().map(Vec::len).sum()
    }
}
