//! The upstream (C3): a handler's one-way connection back to the engine for
//! a single session.
//!
//! Single-threaded by design — the worker never touches a session from more
//! than one task at a time, so unlike the teacher's `SocketClientConn`
//! (which is shared across an accept loop and a Hub event consumer and
//! needs `Arc`/channels to be `Send`-shared) an `Upstream` is owned
//! outright by the handler invocation that holds it.

use crate::channel::ChannelSender;
use crate::codec::Message;
use crate::error::{Error, WireErrorCode};

/// Lifecycle state of an upstream (spec.md I2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
}

/// A handler's write-only view of its session.
///
/// Every method that sends a frame first checks the state machine: once
/// `close()` or `error()` has been called (or a `choke`/`error` frame has
/// gone out by any path), further writes fail with [`Error::StreamClosed`]
/// rather than silently reordering frames after end-of-stream.
#[derive(Debug)]
pub struct Upstream {
    session_id: u64,
    channel: ChannelSender,
    state: State,
}

impl Upstream {
    pub(crate) fn new(session_id: u64, channel: ChannelSender) -> Self {
        Self {
            session_id,
            channel,
            state: State::Open,
        }
    }

    /// Session this upstream belongs to.
    #[must_use]
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Write a chunk of output data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamClosed`] if the upstream has already been
    /// closed or errored.
    pub fn write(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.ensure_open()?;
        self.channel.send(&Message::Chunk {
            session_id: self.session_id,
            data,
        });
        Ok(())
    }

    /// Report a handler-level failure and end the stream.
    ///
    /// Emits `error(session_id, code, message)` immediately followed by
    /// `choke(session_id)` — an atomic pair on the wire (spec.md §4.3): no
    /// other session's frames may be enqueued between them, which holds
    /// here because the channel writer is only ever touched synchronously
    /// from this single-threaded dispatch loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamClosed`] if already closed.
    pub fn error(&mut self, code: WireErrorCode, message: impl Into<String>) -> Result<(), Error> {
        self.ensure_open()?;
        self.channel.send(&Message::Error {
            session_id: self.session_id,
            code: code.into(),
            message: message.into(),
        });
        self.channel.send(&Message::Choke {
            session_id: self.session_id,
        });
        self.state = State::Closed;
        Ok(())
    }

    /// End the stream normally.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamClosed`] if already closed.
    pub fn close(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        self.channel.send(&Message::Choke {
            session_id: self.session_id,
        });
        self.state = State::Closed;
        Ok(())
    }

    /// Whether this upstream is still open for writes.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.state == State::Open {
            Ok(())
        } else {
            Err(Error::StreamClosed)
        }
    }
}

impl Drop for Upstream {
    /// Best-effort `choke` if a handler dropped its upstream without
    /// explicitly closing it (spec.md I2) — the session still needs to end
    /// on the wire even if the handler panicked or returned early.
    fn drop(&mut self) {
        if self.state == State::Open {
            self.channel.send(&Message::Choke {
                session_id: self.session_id,
            });
            self.state = State::Closed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::codec::{FrameDecoder, RawFrame};
    use tokio::io::AsyncReadExt;
    use tokio::net::{UnixListener, UnixStream};

    async fn paired_channel() -> (ChannelSender, UnixStream) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let connect = Channel::connect(&path);
        let accept = listener.accept();
        let (channel, accept_result) = tokio::join!(connect, accept);
        std::mem::forget(dir);
        let channel = channel.unwrap();
        let sender = channel.sender();
        // The sender only keeps the mpsc queue alive; the write task that
        // actually drains it into the socket belongs to `channel`, which
        // now aborts that task on drop (spec.md §5). Leak it for the
        // test's duration, same as the tempdir above.
        std::mem::forget(channel);
        (sender, accept_result.unwrap().0)
    }

    async fn next_message(peer: &mut UnixStream) -> Message {
        let mut buf = [0u8; 256];
        let n = peer.read(&mut buf).await.unwrap();
        let mut dec = FrameDecoder::new();
        let frames = dec.feed(&buf[..n]).unwrap();
        match &frames[0] {
            RawFrame::Known(msg) => msg.clone(),
            RawFrame::Unknown(id) => panic!("unexpected unknown type {id}"),
        }
    }

    #[tokio::test]
    async fn write_emits_chunk() {
        let (channel, mut peer) = paired_channel().await;
        let mut up = Upstream::new(5, channel);
        up.write(vec![1, 2, 3]).unwrap();

        match next_message(&mut peer).await {
            Message::Chunk { session_id, data } => {
                assert_eq!(session_id, 5);
                assert_eq!(data, vec![1, 2, 3]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_after_close_is_stream_closed() {
        let (channel, mut peer) = paired_channel().await;
        let mut up = Upstream::new(1, channel);
        up.close().unwrap();
        let _ = next_message(&mut peer).await; // drain the choke

        let err = up.write(vec![]).unwrap_err();
        assert!(matches!(err, Error::StreamClosed));
    }

    #[tokio::test]
    async fn drop_without_close_sends_choke() {
        let (channel, mut peer) = paired_channel().await;
        {
            let up = Upstream::new(9, channel);
            drop(up);
        }

        match next_message(&mut peer).await {
            Message::Choke { session_id } => assert_eq!(session_id, 9),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_emits_error_then_choke() {
        let (channel, mut peer) = paired_channel().await;
        let mut up = Upstream::new(2, channel);
        up.error(WireErrorCode::InvocationError, "boom").unwrap();
        assert!(!up.is_open());

        match next_message(&mut peer).await {
            Message::Error {
                session_id,
                message,
                ..
            } => {
                assert_eq!(session_id, 2);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected: {other:?}"),
        }
        match next_message(&mut peer).await {
            Message::Choke { session_id } => assert_eq!(session_id, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_close_fails_with_stream_closed() {
        let (channel, mut peer) = paired_channel().await;
        let mut up = Upstream::new(4, channel);
        up.close().unwrap();
        let _ = next_message(&mut peer).await;
        assert!(matches!(up.close().unwrap_err(), Error::StreamClosed));
    }
}
