//! Wire protocol: message types (`message`) and their framing (`frame`).

pub mod frame;
pub mod message;

pub use frame::{encode, FrameDecoder, RawFrame};
pub use message::{Message, Priority};
