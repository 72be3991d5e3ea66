//! Wire codec for the engine RPC channel.
//!
//! Length-prefixed frames, MessagePack payload:
//!
//! ```text
//! [u32 LE frame length][u16 LE type id][msgpack-encoded args array]
//! ```
//!
//! `frame length` counts everything after itself (the type id plus the
//! payload), the same convention the teacher's own `socket::framing` codec
//! uses for its `[u32 LE length][u8 type][payload]` frames — only the type
//! tag width and payload format differ here.

use serde_bytes::ByteBuf;

use crate::codec::message::{terminate_reason, type_id, Message};
use crate::error::Error;

/// Maximum frame payload size, matching the teacher's `socket::framing`
/// cap — generous enough for any realistic chunk, small enough to bound
/// memory if a peer sends a bogus length.
const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// A frame successfully split off the byte stream.
///
/// Unknown type ids decode to `Unknown` rather than an error so the caller
/// can drop-and-warn without losing synchronization with the rest of the
/// stream (spec.md §4.1(c)).
#[derive(Debug)]
pub enum RawFrame {
    /// A message this worker understands.
    Known(Message),
    /// A well-formed frame whose type id has no known meaning.
    Unknown(u16),
}

/// Encode a message into its wire representation.
pub fn encode(msg: &Message) -> Vec<u8> {
    let payload = match msg {
        Message::Handshake { uuid } => encode_payload(&(uuid,)),
        Message::Heartbeat => encode_payload(&()),
        Message::Invoke { session_id, event } => encode_payload(&(session_id, event)),
        Message::Chunk { session_id, data } => {
            encode_payload(&(session_id, ByteBuf::from(data.clone())))
        }
        Message::Error {
            session_id,
            code,
            message,
        } => encode_payload(&(session_id, code, message)),
        Message::Choke { session_id } => encode_payload(&(session_id,)),
        Message::Terminate { reason, message } => encode_payload(&(reason, message)),
    };
    encode_raw(msg.type_id(), &payload)
}

fn encode_payload<T: serde::Serialize>(value: &T) -> Vec<u8> {
    rmp_serde::to_vec(value).expect("message fields always serialize to MessagePack")
}

/// Build a raw envelope around an already-encoded MessagePack payload.
///
/// Exposed so sibling protocols that reuse this envelope shape but carry
/// their own message set — the logging RPC connection in `logging`, which
/// only ever sends a single `emit` message — don't need to duplicate the
/// length-prefixing logic.
pub(crate) fn encode_raw(type_id: u16, payload: &[u8]) -> Vec<u8> {
    let length = (2 + payload.len()) as u32; // +2 for the type id
    let mut buf = Vec::with_capacity(4 + 2 + payload.len());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&type_id.to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn decode_frame(type_id: u16, payload: &[u8]) -> Result<RawFrame, Error> {
    use crate::codec::message::type_id as id;

    let msg = match type_id {
        id::HANDSHAKE => {
            let (uuid,): (String,) =
                rmp_serde::from_slice(payload).map_err(|e| Error::Decode(e.to_string()))?;
            Message::Handshake { uuid }
        }
        id::HEARTBEAT => Message::Heartbeat,
        id::INVOKE => {
            let (session_id, event): (u64, String) =
                rmp_serde::from_slice(payload).map_err(|e| Error::Decode(e.to_string()))?;
            Message::Invoke { session_id, event }
        }
        id::CHUNK => {
            let (session_id, data): (u64, ByteBuf) =
                rmp_serde::from_slice(payload).map_err(|e| Error::Decode(e.to_string()))?;
            Message::Chunk {
                session_id,
                data: data.into_vec(),
            }
        }
        id::ERROR => {
            let (session_id, code, message): (u64, i32, String) =
                rmp_serde::from_slice(payload).map_err(|e| Error::Decode(e.to_string()))?;
            Message::Error {
                session_id,
                code,
                message,
            }
        }
        id::CHOKE => {
            let (session_id,): (u64,) =
                rmp_serde::from_slice(payload).map_err(|e| Error::Decode(e.to_string()))?;
            Message::Choke { session_id }
        }
        id::TERMINATE => {
            let (reason, message): (i32, String) =
                rmp_serde::from_slice(payload).map_err(|e| Error::Decode(e.to_string()))?;
            Message::Terminate { reason, message }
        }
        other => return Ok(RawFrame::Unknown(other)),
    };
    Ok(RawFrame::Known(msg))
}

/// Incremental frame decoder handling partial reads from a byte stream.
///
/// Feed bytes via [`FrameDecoder::feed`]; complete frames are returned in
/// order, partial data is retained for the next call.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create a decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the decoder and extract all complete frames.
    ///
    /// # Errors
    ///
    /// Returns an error if a frame is malformed, oversized, or its payload
    /// fails to decode against its (known) type id. A decode error leaves
    /// the decoder's buffer in an undefined state — callers must treat the
    /// channel as terminal afterwards (spec.md §4.2).
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<RawFrame>, Error> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            if self.buf.len() < 4 {
                break;
            }
            let length = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
            if length < 2 {
                return Err(Error::Decode(format!(
                    "frame length {length} shorter than the type id"
                )));
            }
            if length > MAX_FRAME_SIZE {
                return Err(Error::Decode(format!(
                    "frame too large: {length} bytes (max {MAX_FRAME_SIZE})"
                )));
            }

            let total = 4 + length as usize;
            if self.buf.len() < total {
                break;
            }

            let type_id = u16::from_le_bytes([self.buf[4], self.buf[5]]);
            let payload = &self.buf[6..total];
            let frame = decode_frame(type_id, payload)?;
            frames.push(frame);

            self.buf.drain(..total);
        }

        Ok(frames)
    }

    /// Whether the decoder is holding a partial, not-yet-complete frame.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}
