//! The engine's remote logging RPC, kept deliberately separate from the
//! `log`/`env_logger` ambient diagnostics this crate also uses.
//!
//! Two distinct concerns share the name "logging" here:
//!
//! - [`RemoteLogger`] is a wire protocol: it reports application-level
//!   events back to the engine over its own TCP connection, the same way
//!   the original's `cocaine::logger::remote_t` does (`logger.cpp`) — one
//!   `emit(priority, source, message)` RPC per call, framed the same way as
//!   the engine channel but on a separate socket and message set.
//! - `log`/`env_logger`, used everywhere else in this crate via `log::info!`
//!   etc., is this *process's* local stderr diagnostics — channel drops,
//!   decode failures, disown timeouts — and never crosses the wire.

use std::net::SocketAddr;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::codec::frame::encode_raw;
use crate::codec::Priority;
use crate::error::Error;

/// Type id for the logging service's sole RPC method. Distinct namespace
/// from `codec::message::type_id` — this travels over its own connection.
const EMIT_TYPE_ID: u16 = 0;

/// Default endpoint for the engine's logging service, matching the
/// original's hardcoded `127.0.0.1:12501`.
pub const DEFAULT_LOGGING_ENDPOINT: &str = "127.0.0.1:12501";

#[derive(Serialize)]
struct EmitArgs<'a> {
    priority: i32,
    source: &'a str,
    message: &'a str,
}

/// A connection to the engine's logging service.
///
/// Distinct from the main engine [`crate::channel::Channel`]: it only ever
/// writes, never reads, and carries a single message type.
#[derive(Debug)]
pub struct RemoteLogger {
    stream: TcpStream,
}

impl RemoteLogger {
    /// Connect to the engine's logging endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection cannot be established.
    pub async fn connect(endpoint: impl Into<SocketAddr>) -> Result<Self, Error> {
        let stream = TcpStream::connect(endpoint.into()).await?;
        Ok(Self { stream })
    }

    /// Emit one log record to the engine.
    ///
    /// `source` is conventionally `worker/<app_name>` for runtime events
    /// this crate itself generates, and `app/<app_name>` for events an
    /// application's own handler code reports (spec.md §6).
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; callers should treat this as
    /// non-fatal to the worker (a logging outage must not take down request
    /// processing).
    pub async fn emit(
        &mut self,
        priority: Priority,
        source: &str,
        message: &str,
    ) -> Result<(), Error> {
        let payload = rmp_serde::to_vec(&EmitArgs {
            priority: priority as i32,
            source,
            message,
        })
        .expect("emit args always serialize to MessagePack");
        let frame = encode_raw(EMIT_TYPE_ID, &payload);
        self.stream.write_all(&frame).await?;
        Ok(())
    }
}

/// Log source for events the worker runtime itself generates, as opposed to
/// events an application's handler code reports.
#[must_use]
pub fn worker_source(app_name: &str) -> String {
    format!("worker/{app_name}")
}

/// Log source for events an application's own handler code reports.
#[must_use]
pub fn app_source(app_name: &str) -> String {
    format!("app/{app_name}")
}

/// Initialize the process-local `env_logger` diagnostics, honoring
/// `RUST_LOG` the same way the teacher's `main.rs` does.
pub fn init_local_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}
