//! Typed error kinds for the session multiplexer.
//!
//! Each variant corresponds to one row of the error table in the
//! specification: a distinct failure mode with its own wire/propagation
//! policy. Handler- and application-level errors are not fatal to the
//! worker; channel-level errors are (see `worker::Worker::run`).

use std::fmt;

/// Errors raised anywhere in the session multiplexer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An operation was attempted on an upstream that already transitioned
    /// to `closed`.
    #[error("stream has already been closed")]
    StreamClosed,

    /// `Application::invoke` found no matching event binding and no default
    /// factory.
    #[error("no handler registered for event {0:?}")]
    NoSuchEvent(String),

    /// A factory was invoked before being bound to its owning application.
    #[error("factory was not bound to an application")]
    BadFactory,

    /// A handler raised while processing `write` or `close`.
    #[error("{0}")]
    InvocationError(String),

    /// The frame codec could not decode a message.
    #[error("decode error: {0}")]
    Decode(String),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The disown timer fired: the engine stopped heartbeating in time.
    #[error("disowned: no heartbeat from engine within the disown window")]
    Disown,
}

/// Numeric error codes carried on the wire in `error(session_id, code, message)`
/// frames. The Cocaine protocol treats these as plain integers; this enum
/// gives the two codes this worker ever emits a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum WireErrorCode {
    /// A handler or factory failed while servicing an invocation.
    InvocationError = 1,
}

impl fmt::Display for WireErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as i32)
    }
}

impl From<WireErrorCode> for i32 {
    fn from(code: WireErrorCode) -> Self {
        code as i32
    }
}
