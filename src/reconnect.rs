//! Automatic re-join after a dropped room channel.
//!
//! The session never retries on its own. A [`ReconnectWatcher`] sits above it
//! for as long as a room is on screen, watches the error field, and re-joins
//! the room when the connection-lost error shows up, at most
//! [`ReconnectPolicy::max_attempts`] times until it is reset.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::session::Session;

/// Errors containing this text trigger a reconnect.
pub const CONNECTION_LOST_SIGNATURE: &str = "Connection lost";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^attempt`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => 1u32
                .checked_shl(attempt)
                .and_then(|factor| base.checked_mul(factor))
                .map_or(max, |delay| delay.min(max)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            max_attempts: 3,
            backoff: Backoff::Fixed(Duration::from_secs(3)),
        }
    }
}

/// Attempt bookkeeping, free of any timers.
#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        ReconnectTracker { policy, attempts: 0 }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    /// The delay before the next attempt, if `error` calls for one and the
    /// budget is not spent.
    pub fn on_error(&self, error: Option<&str>) -> Option<Duration> {
        let lost = error.is_some_and(|error| error.contains(CONNECTION_LOST_SIGNATURE));
        (lost && !self.is_exhausted()).then(|| self.policy.backoff.delay(self.attempts))
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[derive(Debug)]
enum WatcherCommand {
    Reset,
    Reconnect,
}

/// Runs the reconnect policy for one room until shut down or dropped.
pub struct ReconnectWatcher {
    commands: mpsc::UnboundedSender<WatcherCommand>,
    attempts: watch::Receiver<u32>,
    token: CancellationToken,
}

impl ReconnectWatcher {
    pub fn spawn(session: Session, room_id: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (attempts_tx, attempts) = watch::channel(0);
        let token = CancellationToken::new();

        let task = WatcherTask {
            states: session.subscribe(),
            session,
            room_id: room_id.into(),
            tracker: ReconnectTracker::new(policy),
            attempts: attempts_tx,
            deadline: None,
        };
        tokio::spawn(task.run(command_rx, token.clone()));

        ReconnectWatcher {
            commands,
            attempts,
            token,
        }
    }

    /// Attempts made since the watcher started or was last reset.
    pub fn attempts(&self) -> u32 {
        *self.attempts.borrow()
    }

    pub fn reset(&self) {
        let _ = self.commands.send(WatcherCommand::Reset);
    }

    /// Clears the attempt count and re-joins immediately.
    pub fn manual_reconnect(&self) {
        let _ = self.commands.send(WatcherCommand::Reconnect);
    }

    /// Cancels any pending attempt and stops watching.
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

impl Drop for ReconnectWatcher {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct WatcherTask {
    session: Session,
    states: watch::Receiver<crate::session::SessionState>,
    room_id: String,
    tracker: ReconnectTracker,
    attempts: watch::Sender<u32>,
    deadline: Option<Instant>,
}

impl WatcherTask {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<WatcherCommand>,
        token: CancellationToken,
    ) {
        let mut last_error = self.current_error();
        self.schedule(last_error.as_deref());

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                changed = self.states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let error = self.current_error();
                    if error != last_error {
                        last_error = error;
                        if self.deadline.is_none() {
                            self.schedule(last_error.as_deref());
                        }
                    }
                }
                Some(command) = commands.recv() => {
                    self.tracker.reset();
                    self.publish_attempts();
                    if let WatcherCommand::Reconnect = command {
                        self.deadline = None;
                        log::info!("Manual reconnect to room {}", self.room_id);
                        self.session.join_room(&self.room_id).await;
                    }
                    last_error = self.current_error();
                    if self.deadline.is_none() {
                        self.schedule(last_error.as_deref());
                    }
                }
                () = wait_for(self.deadline) => {
                    self.deadline = None;
                    self.tracker.record_attempt();
                    self.publish_attempts();
                    log::info!(
                        "Reconnect attempt {} for room {}",
                        self.tracker.attempts(),
                        self.room_id
                    );
                    self.session.join_room(&self.room_id).await;
                    last_error = self.current_error();
                    self.schedule(last_error.as_deref());
                }
            }
        }
        log::debug!("Reconnect watcher for room {} stopped", self.room_id);
    }

    fn current_error(&mut self) -> Option<String> {
        self.states.borrow_and_update().error.clone()
    }

    fn schedule(&mut self, error: Option<&str>) {
        if let Some(delay) = self.tracker.on_error(error) {
            log::debug!("Reconnecting to room {} in {delay:?}", self.room_id);
            self.deadline = Some(Instant::now() + delay);
        } else if self.tracker.is_exhausted() && error.is_some() {
            log::debug!("Reconnect budget for room {} spent", self.room_id);
        }
    }

    fn publish_attempts(&self) {
        let _ = self.attempts.send(self.tracker.attempts());
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
