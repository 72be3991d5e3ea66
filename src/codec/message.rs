//! The Cocaine RPC message set (spec.md §3).
//!
//! A single `Message` enum carries every variant exchanged in either
//! direction over the engine channel; the worker only ever constructs the
//! worker→engine variants and only ever matches on the engine→worker ones,
//! but one shared type keeps the codec (`codec::frame`) simple.

use serde::{Deserialize, Serialize};

/// Log priority, totally ordered `debug < info < warning < error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    /// Verbose diagnostic detail.
    Debug = 0,
    /// Routine operational information.
    Info = 1,
    /// Recoverable but noteworthy condition.
    Warning = 2,
    /// Failure requiring attention.
    Error = 3,
}

/// Wire-stable type id for each `Message` variant.
///
/// These are encoded as the `u16 LE` tag described in SPEC_FULL.md §3 and
/// must never be renumbered once a worker is deployed against a given
/// engine build.
pub mod type_id {
    /// `handshake(uuid)`.
    pub const HANDSHAKE: u16 = 0;
    /// `heartbeat()`.
    pub const HEARTBEAT: u16 = 1;
    /// `invoke(session_id, event)` — engine→worker only.
    pub const INVOKE: u16 = 2;
    /// `chunk(session_id, bytes)`.
    pub const CHUNK: u16 = 3;
    /// `error(session_id, code, message)` — worker→engine only.
    pub const ERROR: u16 = 4;
    /// `choke(session_id)`.
    pub const CHOKE: u16 = 5;
    /// `terminate(reason, message)`.
    pub const TERMINATE: u16 = 6;
}

/// A decoded (or to-be-encoded) RPC message.
///
/// Not every variant is meaningful in every direction — see spec.md §3's
/// direction column — but the type is shared so the codec and channel
/// don't need two near-identical enums. Each variant's fields are packed
/// on the wire as a MessagePack array, handled by `codec::frame` rather
/// than by deriving `Serialize`/`Deserialize` directly on this enum (serde's
/// default enum representation doesn't match the Cocaine `[type_id, [args]]`
/// shape).
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Announce (worker→engine) or echo (engine→worker) a worker's uuid.
    Handshake {
        /// Opaque worker identity, assigned at startup.
        uuid: String,
    },
    /// Liveness beacon, carries no payload.
    Heartbeat,
    /// Begin a session (engine→worker only).
    Invoke {
        /// Opaque identifier for this invocation, unique while live.
        session_id: u64,
        /// The event name to dispatch.
        event: String,
    },
    /// One chunk of input or output data for a session.
    Chunk {
        /// Session this chunk belongs to.
        session_id: u64,
        /// Raw payload bytes.
        data: Vec<u8>,
    },
    /// A session failed (worker→engine only).
    Error {
        /// Session the error applies to.
        session_id: u64,
        /// Numeric error code (see `error::WireErrorCode`).
        code: i32,
        /// Human-readable description.
        message: String,
    },
    /// End-of-stream marker for a session, in either direction.
    Choke {
        /// Session reaching end-of-stream.
        session_id: u64,
    },
    /// Shutdown signal, in either direction.
    Terminate {
        /// Machine-readable reason code.
        reason: i32,
        /// Human-readable description.
        message: String,
    },
}

/// Reason codes carried in `Terminate` frames.
pub mod terminate_reason {
    /// Orderly shutdown, either self-initiated or in response to the engine.
    pub const NORMAL: i32 = 0;
}

impl Message {
    /// The wire type id this message encodes as.
    #[must_use]
    pub fn type_id(&self) -> u16 {
        match self {
            Message::Handshake { .. } => type_id::HANDSHAKE,
            Message::Heartbeat => type_id::HEARTBEAT,
            Message::Invoke { .. } => type_id::INVOKE,
            Message::Chunk { .. } => type_id::CHUNK,
            Message::Error { .. } => type_id::ERROR,
            Message::Choke { .. } => type_id::CHOKE,
            Message::Terminate { .. } => type_id::TERMINATE,
        }
    }
}
