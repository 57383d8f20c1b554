//! Wire protocol for chunk upload and service push messages.
//!
//! One [`ChunkMessage`] type serves both deployments: JSON text frames carry
//! each compressed frame as a base64 string, MessagePack binary frames carry
//! raw byte blobs. The split rides on `Serializer::is_human_readable`, so the
//! struct needs no per-format duplication.
//!
//! Inbound traffic is classified tag-first: messages with a known `type`
//! become [`ControlMessage`]s; anything else must be result-shaped (a `bpm`
//! key plus a valid `quality`) or it is a protocol error.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::types::{Chunk, SessionResult};

/// Encoding used for outbound chunk messages on the streaming transport.
///
/// The polling transport always speaks JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// Text frames; frame buffers are base64 strings.
    #[default]
    Json,
    /// Binary frames via MessagePack; frame buffers are raw bytes.
    MessagePack,
}

impl WireFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Json => "json",
            WireFormat::MessagePack => "messagepack",
        }
    }
}

/// One chunk of compressed frames as the service expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMessage {
    pub chunk_seq: u64,
    pub ts_start_ms: u64,
    /// Frame count; doubles as the per-chunk rate estimate on a 1s cadence.
    pub fps_est: u32,
    pub width: u32,
    pub height: u32,
    pub n: u32,
    #[serde(with = "frame_buffers")]
    pub frames: Vec<Vec<u8>>,
}

impl ChunkMessage {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        let n = chunk.frame_count() as u32;
        Self {
            chunk_seq: chunk.seq,
            ts_start_ms: chunk.ts_start_ms,
            fps_est: n,
            width: chunk.width,
            height: chunk.height,
            n,
            frames: chunk.frames.clone(),
        }
    }

    /// Serializes for the given wire format.
    pub fn encode(&self, format: WireFormat) -> Result<Vec<u8>> {
        match format {
            WireFormat::Json => Ok(serde_json::to_vec(self)?),
            // named maps on the wire; positional tuples would not survive
            // service-side field reordering
            WireFormat::MessagePack => Ok(rmp_serde::to_vec_named(self)?),
        }
    }
}

/// Serde adapter for the `frames` field: base64 strings in human-readable
/// formats, raw byte blobs otherwise.
mod frame_buffers {
    use super::BASE64;
    use base64::Engine as _;
    use serde::de::{SeqAccess, Visitor};
    use serde::ser::SerializeSeq;
    use serde::{Deserialize as _, Deserializer, Serializer};

    struct RawFrame<'a>(&'a [u8]);

    impl serde::Serialize for RawFrame<'_> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_bytes(self.0)
        }
    }

    pub fn serialize<S: Serializer>(
        frames: &[Vec<u8>],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            let mut seq = serializer.serialize_seq(Some(frames.len()))?;
            for frame in frames {
                seq.serialize_element(&BASE64.encode(frame))?;
            }
            seq.end()
        } else {
            let mut seq = serializer.serialize_seq(Some(frames.len()))?;
            for frame in frames {
                seq.serialize_element(&RawFrame(frame))?;
            }
            seq.end()
        }
    }

    struct FrameBlob(Vec<u8>);

    impl<'de> serde::Deserialize<'de> for FrameBlob {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            struct BlobVisitor;

            impl<'de> Visitor<'de> for BlobVisitor {
                type Value = FrameBlob;

                fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str("a frame byte buffer")
                }

                fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                    Ok(FrameBlob(v.to_vec()))
                }

                fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                    Ok(FrameBlob(v))
                }

                fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                    let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                    while let Some(byte) = seq.next_element::<u8>()? {
                        bytes.push(byte);
                    }
                    Ok(FrameBlob(bytes))
                }
            }

            deserializer.deserialize_byte_buf(BlobVisitor)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        if deserializer.is_human_readable() {
            let encoded = Vec::<String>::deserialize(deserializer)?;
            encoded
                .iter()
                .map(|s| BASE64.decode(s).map_err(serde::de::Error::custom))
                .collect()
        } else {
            let blobs = Vec::<FrameBlob>::deserialize(deserializer)?;
            Ok(blobs.into_iter().map(|blob| blob.0).collect())
        }
    }
}

/// Synchronous acknowledgment body returned by `POST /sessions/{id}/chunk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ChunkAck {
    pub chunk_seq: u64,
    #[serde(default)]
    pub received: u32,
}

/// Type-tagged control messages pushed by the service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Ack {
        chunk_seq: u64,
        #[serde(default)]
        received: u32,
    },
    ChunkSignal {
        #[serde(default)]
        face_detected: bool,
    },
    Progress {
        #[serde(default)]
        stage: String,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

/// Any inbound service message: a control message or the terminal result.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Control(ControlMessage),
    Result(SessionResult),
}

impl ServerMessage {
    /// Decodes a text (JSON) frame.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        if let Ok(control) = serde_json::from_slice::<ControlMessage>(bytes) {
            return Ok(ServerMessage::Control(control));
        }
        // not a known tag: must be result-shaped (bpm key + quality band)
        let result = serde_json::from_slice::<SessionResult>(bytes)
            .map_err(|e| SessionError::protocol("server message", e.to_string()))?;
        Ok(ServerMessage::Result(result))
    }

    /// Decodes a binary (MessagePack) frame.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        if let Ok(control) = rmp_serde::from_slice::<ControlMessage>(bytes) {
            return Ok(ServerMessage::Control(control));
        }
        let result = rmp_serde::from_slice::<SessionResult>(bytes)
            .map_err(|e| SessionError::protocol("server message", e.to_string()))?;
        Ok(ServerMessage::Result(result))
    }
}

#[derive(Serialize)]
struct EndMessage {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// The `{type:"end"}` control message, always sent as JSON text.
pub fn encode_end() -> String {
    serde_json::to_string(&EndMessage { kind: "end" })
        .unwrap_or_else(|_| r#"{"type":"end"}"#.to_string())
}
