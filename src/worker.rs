//! The worker core (C5): owns the channel, drives the heartbeat/disown
//! timers, and routes inbound frames to per-session handler streams.
//!
//! This is the only module that ever touches more than one session at a
//! time, and it does so serially — `tokio::select!` over the channel
//! reader and the two timers, never spawning per-session tasks (spec.md
//! §5, §9 "cooperative scheduling").

use std::collections::HashMap;
use std::time::Duration;

use crate::app::{Application, Handler};
use crate::channel::{Channel, ChannelEvent};
use crate::codec::message::terminate_reason;
use crate::codec::{Message, Priority};
use crate::error::{Error, WireErrorCode};
use crate::logging::{self, RemoteLogger};
use crate::timers::{Scheduler, TokioScheduler};
use crate::upstream::Upstream;

/// Heartbeat period (spec.md §4.5, `H`).
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);
/// Disown window (spec.md §4.5, `D`).
pub const DISOWN_WINDOW: Duration = Duration::from_secs(2);

struct Session {
    upstream: Upstream,
    handler: Box<dyn Handler>,
}

/// Why the worker's event loop stopped.
#[derive(Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// The engine sent `terminate`; the worker replied in kind and exited
    /// cleanly.
    Terminated,
    /// The disown timer fired: no engine heartbeat arrived in time.
    Disowned,
    /// The channel failed (decode error or transport error).
    ChannelFailed,
}

/// The session multiplexer and RPC state machine.
pub struct Worker {
    uuid: String,
    app: Application,
    channel: Channel,
    sessions: HashMap<u64, Session>,
    remote_logger: Option<RemoteLogger>,
    log_source: String,
}

impl Worker {
    /// Connect to the engine's endpoint, send the handshake, and return a
    /// worker ready to `run()` (spec.md §4.5 steps 1-3).
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be opened.
    pub async fn connect(
        endpoint: impl AsRef<std::path::Path>,
        uuid: String,
        app: Application,
    ) -> Result<Self, Error> {
        let channel = Channel::connect(endpoint).await?;
        channel.send(&Message::Handshake { uuid: uuid.clone() });
        let log_source = logging::worker_source(app.name());
        Ok(Self {
            uuid,
            app,
            channel,
            sessions: HashMap::new(),
            remote_logger: None,
            log_source,
        })
    }

    /// This worker's identity, as sent in the handshake.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Attach a connection to the engine's remote logging service (spec.md
    /// §6) so the dispatch loop's own diagnostics — disown, unknown frame
    /// types, channel failures — are reported to the engine via
    /// `emit(priority, source, message)` under the `worker/<app_name>`
    /// source, in addition to this process's local `log`/`env_logger`
    /// output. Optional: a worker run without one still operates
    /// correctly, it just doesn't forward these lines anywhere but stderr.
    #[must_use]
    pub fn with_remote_logger(mut self, logger: RemoteLogger) -> Self {
        self.remote_logger = Some(logger);
        self
    }

    /// Emit a dispatch-loop diagnostic to the remote logging service, if
    /// one is attached. Failures here are logged locally and otherwise
    /// swallowed — a logging outage must not take down request processing.
    async fn remote_log(&mut self, priority: Priority, message: &str) {
        if let Some(logger) = self.remote_logger.as_mut() {
            if let Err(e) = logger.emit(priority, &self.log_source, message).await {
                log::warn!("remote logging failed: {e}");
            }
        }
    }

    /// Run the event loop to completion (spec.md §4.5 steps 4-6).
    ///
    /// Returns once the engine terminates the worker, disowns it, or the
    /// channel fails. On return, all live sessions have already been
    /// dropped, emitting a best-effort `choke` for each still-open upstream
    /// (spec.md shutdown clause, I2/I3).
    pub async fn run(mut self) -> ExitReason {
        self.run_with_scheduler(TokioScheduler::new(HEARTBEAT_PERIOD, DISOWN_WINDOW))
            .await
    }

    /// `run`, parameterized over the timer source — lets tests drive the
    /// heartbeat/disown logic against `tokio::time::pause`'d virtual time.
    pub async fn run_with_scheduler(&mut self, mut scheduler: impl Scheduler) -> ExitReason {
        let mut disowned = false;

        let reason = loop {
            tokio::select! {
                biased;

                () = scheduler.wait_disown(), if disowned => {
                    let message = "disowned: no heartbeat from engine within the disown window";
                    log::error!("{message}");
                    self.remote_log(Priority::Error, message).await;
                    break ExitReason::Disowned;
                }

                () = scheduler.tick_heartbeat() => {
                    self.channel.send(&Message::Heartbeat);
                    scheduler.reset_disown();
                    disowned = true;
                }

                event = self.channel.recv() => {
                    match event {
                        Some(ChannelEvent::Message(Message::Heartbeat)) => {
                            disowned = false;
                        }
                        Some(ChannelEvent::Message(msg @ Message::Invoke { .. })) => {
                            self.dispatch_invoke(msg);
                        }
                        Some(ChannelEvent::Message(msg @ Message::Chunk { .. })) => {
                            self.dispatch_chunk(msg);
                        }
                        Some(ChannelEvent::Message(Message::Choke { session_id })) => {
                            self.dispatch_choke(session_id);
                        }
                        Some(ChannelEvent::Message(Message::Terminate { .. })) => {
                            self.channel.send(&Message::Terminate {
                                reason: terminate_reason::NORMAL,
                                message: "per request".into(),
                            });
                            break ExitReason::Terminated;
                        }
                        Some(ChannelEvent::Message(Message::Handshake { .. })) => {
                            // The engine never sends this; ignore defensively.
                        }
                        Some(ChannelEvent::Message(Message::Error { .. })) => {
                            // worker→engine only; the engine shouldn't send it.
                        }
                        Some(ChannelEvent::UnknownType(type_id)) => {
                            let message = format!("dropping frame with unknown type id {type_id}");
                            log::warn!("{message}");
                            self.remote_log(Priority::Warning, &message).await;
                        }
                        Some(ChannelEvent::Eof) => {
                            let message = "engine closed the connection";
                            log::error!("{message}");
                            self.remote_log(Priority::Error, message).await;
                            break ExitReason::ChannelFailed;
                        }
                        Some(ChannelEvent::Failed(e)) => {
                            let message = format!("channel failed: {e}");
                            log::error!("{message}");
                            self.remote_log(Priority::Error, &message).await;
                            break ExitReason::ChannelFailed;
                        }
                        None => {
                            break ExitReason::ChannelFailed;
                        }
                    }
                }
            }
        };

        self.sessions.clear(); // drops each Upstream, emitting choke if still open
        reason
    }

    fn dispatch_invoke(&mut self, msg: Message) {
        let Message::Invoke { session_id, event } = msg else {
            unreachable!("caller guarantees Invoke")
        };
        let mut upstream = Upstream::new(session_id, self.channel.sender());
        match self.app.invoke(&event, &mut upstream) {
            Ok(handler) => {
                self.sessions.insert(session_id, Session { upstream, handler });
            }
            Err(e) => {
                let _ = upstream.error(WireErrorCode::InvocationError, e.to_string());
            }
        }
    }

    fn dispatch_chunk(&mut self, msg: Message) {
        let Message::Chunk { session_id, data } = msg else {
            unreachable!("caller guarantees Chunk")
        };
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return; // B1: unknown session, silently dropped
        };
        if let Err(e) = session.handler.write(&mut session.upstream, data) {
            let mut session = self.sessions.remove(&session_id).expect("just looked up");
            let _ = session.upstream.error(WireErrorCode::InvocationError, e.to_string());
        }
    }

    fn dispatch_choke(&mut self, session_id: u64) {
        let Some(mut session) = self.sessions.remove(&session_id) else {
            return; // B2: unknown session, silently dropped
        };
        if let Err(e) = session.handler.close(&mut session.upstream) {
            let _ = session.upstream.error(WireErrorCode::InvocationError, e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::function_factory;
    use crate::codec::{FrameDecoder, RawFrame};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{UnixListener, UnixStream};

    async fn connected_worker(app: Application) -> (Worker, UnixStream) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let connect = Worker::connect(&path, "uuid-1".into(), app);
        let accept = listener.accept();
        let (worker, accept_result) = tokio::join!(connect, accept);
        std::mem::forget(dir);
        let mut peer = accept_result.unwrap().0;

        // Drain the worker's handshake frame so later reads line up.
        let mut buf = [0u8; 256];
        let n = peer.read(&mut buf).await.unwrap();
        let mut dec = FrameDecoder::new();
        let frames = dec.feed(&buf[..n]).unwrap();
        assert!(matches!(
            frames[0],
            RawFrame::Known(Message::Handshake { .. })
        ));

        (worker.unwrap(), peer)
    }

    async fn read_messages(peer: &mut UnixStream, count: usize) -> Vec<Message> {
        let mut dec = FrameDecoder::new();
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        while out.len() < count {
            let n = peer.read(&mut buf).await.unwrap();
            for frame in dec.feed(&buf[..n]).unwrap() {
                match frame {
                    RawFrame::Known(msg) => out.push(msg),
                    RawFrame::Unknown(id) => panic!("unexpected unknown type {id}"),
                }
            }
        }
        out
    }

    fn echo_app() -> Application {
        Application::new(
            "echo",
            vec![(
                "event1".into(),
                function_factory(|_event, chunks| Ok(chunks.concat())),
            )],
        )
    }

    /// S1 — happy path, function handler standing in for the "class
    /// handler" scenario (both styles share the same worker dispatch code).
    #[tokio::test]
    async fn s1_happy_path() {
        let (worker, mut peer) = connected_worker(echo_app()).await;
        let run = tokio::spawn(worker.run());

        peer.write_all(&crate::codec::encode(&Message::Invoke {
            session_id: 7,
            event: "event1".into(),
        }))
        .await
        .unwrap();
        peer.write_all(&crate::codec::encode(&Message::Chunk {
            session_id: 7,
            data: b"hi".to_vec(),
        }))
        .await
        .unwrap();
        peer.write_all(&crate::codec::encode(&Message::Choke { session_id: 7 }))
        .await
        .unwrap();

        let msgs = read_messages(&mut peer, 2).await;
        assert_eq!(
            msgs,
            vec![
                Message::Chunk {
                    session_id: 7,
                    data: b"hi".to_vec()
                },
                Message::Choke { session_id: 7 },
            ]
        );

        drop(peer);
        run.await.unwrap();
    }

    /// S2 — unknown event.
    #[tokio::test]
    async fn s2_unknown_event() {
        let (worker, mut peer) = connected_worker(echo_app()).await;
        let run = tokio::spawn(worker.run());

        peer.write_all(&crate::codec::encode(&Message::Invoke {
            session_id: 42,
            event: "nope".into(),
        }))
        .await
        .unwrap();

        let msgs = read_messages(&mut peer, 2).await;
        match &msgs[0] {
            Message::Error { session_id, .. } => assert_eq!(*session_id, 42),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(msgs[1], Message::Choke { session_id: 42 });

        drop(peer);
        run.await.unwrap();
    }

    /// S3 — function factory echo with an event-aware function.
    #[tokio::test]
    async fn s3_function_factory_echo() {
        let app = Application::new(
            "echo",
            vec![(
                "echo".into(),
                function_factory(|event, chunks| {
                    let joined = chunks
                        .iter()
                        .map(|c| String::from_utf8_lossy(c).into_owned())
                        .collect::<Vec<_>>()
                        .join(",");
                    Ok(format!("{event}:{joined}").into_bytes())
                }),
            )],
        );
        let (worker, mut peer) = connected_worker(app).await;
        let run = tokio::spawn(worker.run());

        peer.write_all(&crate::codec::encode(&Message::Invoke {
            session_id: 1,
            event: "echo".into(),
        }))
        .await
        .unwrap();
        peer.write_all(&crate::codec::encode(&Message::Chunk {
            session_id: 1,
            data: b"a".to_vec(),
        }))
        .await
        .unwrap();
        peer.write_all(&crate::codec::encode(&Message::Chunk {
            session_id: 1,
            data: b"b".to_vec(),
        }))
        .await
        .unwrap();
        peer.write_all(&crate::codec::encode(&Message::Choke { session_id: 1 }))
            .await
            .unwrap();

        let msgs = read_messages(&mut peer, 2).await;
        assert_eq!(
            msgs,
            vec![
                Message::Chunk {
                    session_id: 1,
                    data: b"echo:a,b".to_vec(),
                },
                Message::Choke { session_id: 1 },
            ]
        );

        drop(peer);
        run.await.unwrap();
    }

    /// S4 — handler raises on write.
    #[tokio::test]
    async fn s4_handler_throws_on_write() {
        struct CrashHandler;
        impl Handler for CrashHandler {
            fn invoke(&mut self, _event: &str, _up: &mut Upstream) -> Result<(), Error> {
                Ok(())
            }
            fn write(&mut self, _up: &mut Upstream, _bytes: Vec<u8>) -> Result<(), Error> {
                Err(Error::InvocationError("boom".into()))
            }
            fn close(&mut self, _up: &mut Upstream) -> Result<(), Error> {
                Ok(())
            }
        }
        struct CrashFactory;
        impl crate::app::Factory for CrashFactory {
            fn make_handler(&self, _event: &str) -> Result<Box<dyn Handler>, Error> {
                Ok(Box::new(CrashHandler))
            }
        }

        let app = Application::new(
            "crash",
            vec![(
                "crash".into(),
                crate::app::UnboundFactory::new(|_name| {
                    std::rc::Rc::new(CrashFactory) as std::rc::Rc<dyn crate::app::Factory>
                }),
            )],
        );
        let (worker, mut peer) = connected_worker(app).await;
        let run = tokio::spawn(worker.run());

        peer.write_all(&crate::codec::encode(&Message::Invoke {
            session_id: 3,
            event: "crash".into(),
        }))
        .await
        .unwrap();
        peer.write_all(&crate::codec::encode(&Message::Chunk {
            session_id: 3,
            data: b"x".to_vec(),
        }))
        .await
        .unwrap();

        let msgs = read_messages(&mut peer, 2).await;
        match &msgs[0] {
            Message::Error {
                session_id,
                message,
                ..
            } => {
                assert_eq!(*session_id, 3);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(msgs[1], Message::Choke { session_id: 3 });

        // Session 3 was evicted; a further chunk is silently dropped (B1).
        peer.write_all(&crate::codec::encode(&Message::Chunk {
            session_id: 3,
            data: b"late".to_vec(),
        }))
        .await
        .unwrap();

        drop(peer);
        run.await.unwrap();
    }

    /// S6 — engine-initiated terminate.
    #[tokio::test]
    async fn s6_engine_terminate() {
        let (worker, mut peer) = connected_worker(echo_app()).await;
        let run = tokio::spawn(worker.run());

        peer.write_all(&crate::codec::encode(&Message::Terminate {
            reason: terminate_reason::NORMAL,
            message: "go".into(),
        }))
        .await
        .unwrap();

        let msgs = read_messages(&mut peer, 1).await;
        match &msgs[0] {
            Message::Terminate { message, .. } => assert_eq!(message, "per request"),
            other => panic!("unexpected: {other:?}"),
        }

        let reason = run.await.unwrap();
        assert_eq!(reason, ExitReason::Terminated);
    }

    /// B4 — dropping the worker's remaining sessions on shutdown emits
    /// choke for any still-open upstream.
    #[tokio::test]
    async fn shutdown_chokes_open_sessions() {
        let app = Application::new(
            "slow".into(),
            vec![(
                "slow".into(),
                function_factory(|_event, _chunks| unreachable!("close is never sent")),
            )],
        );
        let (worker, mut peer) = connected_worker(app).await;
        let run = tokio::spawn(worker.run());

        peer.write_all(&crate::codec::encode(&Message::Invoke {
            session_id: 9,
            event: "slow".into(),
        }))
        .await
        .unwrap();
        peer.write_all(&crate::codec::encode(&Message::Terminate {
            reason: terminate_reason::NORMAL,
            message: "go".into(),
        }))
        .await
        .unwrap();

        let msgs = read_messages(&mut peer, 2).await;
        assert!(msgs
            .iter()
            .any(|m| matches!(m, Message::Choke { session_id: 9 })));
        assert!(msgs.iter().any(|m| matches!(m, Message::Terminate { .. })));

        run.await.unwrap();
    }
}
