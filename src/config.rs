//! Endpoint derivation for the engine and logging connections.
//!
//! Pure functions of process arguments and environment, matching spec.md
//! §9's "global state" note: argument parsing and endpoint derivation have
//! no side effects and no hidden state.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use crate::logging::DEFAULT_LOGGING_ENDPOINT;

/// Directory the engine creates its per-application sockets under.
const ENGINE_SOCKET_DIR: &str = "/var/run/cocaine/engines";

/// Environment variable that overrides [`ENGINE_SOCKET_DIR`], so tests and
/// local runs don't need root to create `/var/run/cocaine`.
const ENGINE_SOCKET_DIR_OVERRIDE: &str = "GRAPE_WORKER_ENGINE_DIR";

/// Environment variable that overrides the logging endpoint.
const LOGGING_ENDPOINT_OVERRIDE: &str = "GRAPE_WORKER_LOGGING_ENDPOINT";

/// Resolve the UNIX-domain socket path for `app_name` (spec.md §4.5 step 1,
/// §6). Honors [`ENGINE_SOCKET_DIR_OVERRIDE`] so tests don't write to
/// `/var/run`.
#[must_use]
pub fn engine_endpoint(app_name: &str) -> PathBuf {
    let dir = std::env::var(ENGINE_SOCKET_DIR_OVERRIDE)
        .unwrap_or_else(|_| ENGINE_SOCKET_DIR.to_string());
    PathBuf::from(dir).join(app_name)
}

/// Resolve the logging service's TCP endpoint (spec.md §6), honoring
/// [`LOGGING_ENDPOINT_OVERRIDE`].
///
/// # Errors
///
/// Returns an error if the configured endpoint does not resolve to any
/// socket address.
pub fn logging_endpoint() -> std::io::Result<SocketAddr> {
    let endpoint = std::env::var(LOGGING_ENDPOINT_OVERRIDE)
        .unwrap_or_else(|_| DEFAULT_LOGGING_ENDPOINT.to_string());
    endpoint
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, endpoint))
}
