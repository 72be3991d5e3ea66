//! Session multiplexer and RPC state machine for a Cocaine-style
//! application worker.
//!
//! Module layout mirrors the component breakdown this crate implements:
//! [`codec`] (C1, frame codec), [`channel`] (C2), [`upstream`] (C3),
//! [`app`] (C4, application registry), [`worker`] (C5, worker core), plus
//! the ambient [`timers`], [`logging`], [`config`], and [`error`] support
//! those five lean on.

pub mod app;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod timers;
pub mod upstream;
pub mod worker;

pub use app::{function_factory, Application, Factory, Handler, UnboundFactory};
pub use codec::{Message, Priority};
pub use error::{Error, WireErrorCode};
pub use worker::{ExitReason, Worker};
