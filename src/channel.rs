//! The engine channel (C2): the worker's single multiplexed connection to
//! the engine, carrying every session's frames interleaved.
//!
//! Mirrors the teacher's `socket::client_conn` split-half, mpsc-bridged
//! read/write task pair — except the worker is the connecting side, not the
//! listener, so there is exactly one `Channel` per process rather than one
//! per accepted client.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::codec::{self, FrameDecoder, Message, RawFrame};
use crate::error::Error;

/// Read-buffer size for a single `read()` syscall, matching the teacher's
/// `socket::client_conn` read loop.
const READ_BUF_SIZE: usize = 64 * 1024;

/// Something the channel observed on the wire, handed to the worker's
/// dispatch loop.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A fully decoded message arrived.
    Message(Message),
    /// A well-formed frame with an unrecognized type id arrived; the worker
    /// logs and drops it rather than treating it as fatal (spec.md §4.1c).
    UnknownType(u16),
    /// The engine closed its end of the connection.
    Eof,
    /// The connection failed — decode error or I/O error. Fatal to the
    /// channel; the worker must shut down (spec.md §4.2, I3).
    Failed(Error),
}

/// A cloneable write-only handle onto a [`Channel`].
#[derive(Debug, Clone)]
pub struct ChannelSender {
    outbound_tx: UnboundedSender<Vec<u8>>,
}

impl ChannelSender {
    /// Queue a message for transmission to the engine. See
    /// [`Channel::send`] for the return value's meaning.
    pub fn send(&self, msg: &Message) -> bool {
        self.outbound_tx.send(codec::encode(msg)).is_ok()
    }
}

/// The worker's connection to the engine.
///
/// Owns the read and write tasks bridging the `UnixStream` to channels the
/// worker's single-threaded dispatch loop can `select!` over.
#[derive(Debug)]
pub struct Channel {
    outbound_tx: UnboundedSender<Vec<u8>>,
    inbound_rx: UnboundedReceiver<ChannelEvent>,
    read_handle: JoinHandle<()>,
    write_handle: JoinHandle<()>,
}

impl Channel {
    /// Connect to the engine's endpoint and spawn the read/write tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the Unix socket at `path` cannot be connected to.
    pub async fn connect(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-connected stream. Split out mainly so tests can pair
    /// up a `Channel` with a bare `UnixStream` on the other end without a
    /// real listener.
    pub fn from_stream(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<ChannelEvent>();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let read_handle = tokio::spawn(Self::read_loop(read_half, inbound_tx));
        let write_handle = tokio::spawn(Self::write_loop(write_half, outbound_rx));

        Self {
            outbound_tx,
            inbound_rx,
            read_handle,
            write_handle,
        }
    }

    /// Queue a message for transmission to the engine.
    ///
    /// Returns `false` if the write task has already exited (the connection
    /// is gone); callers should treat this the same as a `Failed` event.
    pub fn send(&self, msg: &Message) -> bool {
        self.outbound_tx.send(codec::encode(msg)).is_ok()
    }

    /// A cheap, cloneable handle for sending messages, independent of the
    /// `Channel`'s receive half. Each session's [`crate::upstream::Upstream`]
    /// holds one of these rather than the whole `Channel`, since it only
    /// ever writes (spec.md §5: the writer is the one resource shared
    /// across upstreams, and `UnboundedSender` already serializes access to
    /// it without locking).
    #[must_use]
    pub fn sender(&self) -> ChannelSender {
        ChannelSender {
            outbound_tx: self.outbound_tx.clone(),
        }
    }

    /// Wait for the next event from the engine.
    ///
    /// Returns `None` once the inbound channel is closed, which only
    /// happens after the read task has already produced an `Eof` or
    /// `Failed` event.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.inbound_rx.recv().await
    }

    async fn read_loop(
        mut reader: tokio::net::unix::OwnedReadHalf,
        inbound_tx: UnboundedSender<ChannelEvent>,
    ) {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; READ_BUF_SIZE];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    let _ = inbound_tx.send(ChannelEvent::Eof);
                    return;
                }
                Ok(n) => match decoder.feed(&buf[..n]) {
                    Ok(frames) => {
                        for frame in frames {
                            let event = match frame {
                                RawFrame::Known(msg) => ChannelEvent::Message(msg),
                                RawFrame::Unknown(type_id) => ChannelEvent::UnknownType(type_id),
                            };
                            if inbound_tx.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = inbound_tx.send(ChannelEvent::Failed(e));
                        return;
                    }
                },
                Err(e) => {
                    let _ = inbound_tx.send(ChannelEvent::Failed(Error::Transport(e)));
                    return;
                }
            }
        }
    }

    async fn write_loop(
        mut writer: tokio::net::unix::OwnedWriteHalf,
        mut outbound_rx: UnboundedReceiver<Vec<u8>>,
    ) {
        while let Some(bytes) = outbound_rx.recv().await {
            if let Err(e) = writer.write_all(&bytes).await {
                log::error!("channel write failed: {e}");
                break;
            }
        }
    }
}

impl Drop for Channel {
    /// Tear down the read/write tasks and close the transport (spec.md §5:
    /// "the channel owns the transport and closes it on drop"). Aborting
    /// both tasks drops their owned half of the split `UnixStream`; the
    /// socket closes once both halves are gone.
    fn drop(&mut self) {
        self.read_handle.abort();
        self.write_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::message::terminate_reason;
    use tokio::net::UnixListener;

    async fn connected_pair() -> (Channel, UnixStream) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let connect = Channel::connect(&path);
        let accept = listener.accept();
        let (channel_result, accept_result) = tokio::join!(connect, accept);
        let channel = channel_result.unwrap();
        let (peer, _addr) = accept_result.unwrap();

        // Keep the TempDir alive for the socket's lifetime by leaking it;
        // the OS cleans up on process exit and tests are short-lived.
        std::mem::forget(dir);
        (channel, peer)
    }

    #[tokio::test]
    async fn sends_encoded_frames_to_peer() {
        let (channel, mut peer) = connected_pair().await;

        assert!(channel.send(&Message::Heartbeat));

        let mut buf = [0u8; 64];
        let n = peer.read(&mut buf).await.unwrap();
        let mut dec = FrameDecoder::new();
        let frames = dec.feed(&buf[..n]).unwrap();
        assert!(matches!(frames[0], RawFrame::Known(Message::Heartbeat)));
    }

    #[tokio::test]
    async fn receives_decoded_frames_from_peer() {
        let (mut channel, mut peer) = connected_pair().await;

        let encoded = codec::encode(&Message::Invoke {
            session_id: 1,
            event: "ping".into(),
        });
        peer.write_all(&encoded).await.unwrap();

        match channel.recv().await.unwrap() {
            ChannelEvent::Message(Message::Invoke { session_id, event }) => {
                assert_eq!(session_id, 1);
                assert_eq!(event, "ping");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn peer_disconnect_yields_eof() {
        let (mut channel, peer) = connected_pair().await;
        drop(peer);

        match channel.recv().await.unwrap() {
            ChannelEvent::Eof => {}
            other => panic!("expected Eof, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_type_id_is_reported_not_fatal() {
        let (mut channel, mut peer) = connected_pair().await;

        let payload = rmp_serde::to_vec(&()).unwrap();
        let mut frame = Vec::new();
        let length = (2 + payload.len()) as u32;
        frame.extend_from_slice(&length.to_le_bytes());
        frame.extend_from_slice(&0xBEEFu16.to_le_bytes());
        frame.extend_from_slice(&payload);
        peer.write_all(&frame).await.unwrap();

        match channel.recv().await.unwrap() {
            ChannelEvent::UnknownType(0xBEEF) => {}
            other => panic!("unexpected event: {other:?}"),
        }

        // channel still usable afterwards
        let encoded = codec::encode(&Message::Terminate {
            reason: terminate_reason::NORMAL,
            message: "bye".into(),
        });
        peer.write_all(&encoded).await.unwrap();
        match channel.recv().await.unwrap() {
            ChannelEvent::Message(Message::Terminate { .. }) => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
