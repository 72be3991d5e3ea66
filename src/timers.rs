//! Heartbeat/disown timing, abstracted behind [`Scheduler`] so
//! `worker::Worker`'s dispatch logic can be driven by fake clocks in tests
//! instead of real wall-clock waits (the teacher's `hub::polling` module
//! takes the same approach with its own poll-interval abstraction).

use std::time::Duration;

use tokio::time::{Instant, Interval};

/// Wall-clock facilities the worker needs: a recurring heartbeat tick and a
/// resettable disown deadline.
///
/// The default impl ([`TokioScheduler`]) wraps real `tokio::time`; tests can
/// swap in a fake implementation to assert on timer behavior without
/// sleeping (start/advance is driven by `tokio::time::pause`/`advance`
/// against this same trait when the `time-util`-paused clock is active, so
/// most tests don't need a fake at all — see `worker.rs`).
pub trait Scheduler {
    /// Block until the next heartbeat tick is due.
    fn tick_heartbeat(&mut self) -> impl std::future::Future<Output = ()>;

    /// Push the disown deadline `disown_window` into the future from now.
    fn reset_disown(&mut self);

    /// Block until the disown deadline passes.
    fn wait_disown(&mut self) -> impl std::future::Future<Output = ()>;
}

/// Real-clock [`Scheduler`] built on `tokio::time::{interval, sleep}`.
#[derive(Debug)]
pub struct TokioScheduler {
    heartbeat: Interval,
    disown_window: Duration,
    disown_deadline: Instant,
}

impl TokioScheduler {
    /// Build a scheduler that ticks every `heartbeat_period` and disowns
    /// after `disown_window` without a reset.
    #[must_use]
    pub fn new(heartbeat_period: Duration, disown_window: Duration) -> Self {
        let mut heartbeat = tokio::time::interval(heartbeat_period);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        Self {
            heartbeat,
            disown_window,
            disown_deadline: Instant::now() + disown_window,
        }
    }
}

impl Scheduler for TokioScheduler {
    async fn tick_heartbeat(&mut self) {
        self.heartbeat.tick().await;
    }

    fn reset_disown(&mut self) {
        self.disown_deadline = Instant::now() + self.disown_window;
    }

    async fn wait_disown(&mut self) {
        tokio::time::sleep_until(self.disown_deadline).await;
    }
}
