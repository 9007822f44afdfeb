//! Connection lifecycle shared by the realtime channels
//!
//! `Disconnected -> Connecting -> Connected -> Reconnecting(n) -> Failed`,
//! with the retry policy held as data rather than encoded in nested timers.

use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;

use super::locked;

/// Observable state of a realtime channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting for, or running, automatic attempt `attempt` (1-based).
    Reconnecting { attempt: u32 },
    /// Retry budget exhausted; only an explicit connect leaves this state.
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn label(&self) -> String {
        match self {
            ConnectionState::Disconnected => "Disconnected".to_string(),
            ConnectionState::Connecting => "Connecting".to_string(),
            ConnectionState::Connected => "Connected".to_string(),
            ConnectionState::Reconnecting { attempt } => format!("Reconnecting ({})", attempt),
            ConnectionState::Failed => "Offline".to_string(),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// How many automatic reconnects to make, and how far apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            delay,
        }
    }

    pub fn unbounded(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
        }
    }

    /// Delay before automatic attempt number `attempt`, or `None` once the
    /// budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt > max => None,
            _ => Some(self.delay),
        }
    }
}

/// Connection state plus retry bookkeeping. Every transition is
/// published to watchers.
pub struct ConnectionMachine {
    state: ConnectionState,
    policy: RetryPolicy,
    attempts: u32,
    tx: watch::Sender<ConnectionState>,
}

impl ConnectionMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state: ConnectionState::Disconnected,
            policy,
            attempts: 0,
            tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    fn set(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!("Connection state {} -> {}", self.state, state);
        }
        self.state = state;
        self.tx.send_replace(state);
    }

    /// Explicit connect request; resets the retry budget.
    pub fn begin(&mut self) {
        self.attempts = 0;
        self.set(ConnectionState::Connecting);
    }

    /// Explicit connect that yields to a live session or to any attempt
    /// in flight, automatic retries included. Returns the blocking state
    /// on refusal.
    pub fn try_begin(&mut self) -> Result<(), ConnectionState> {
        match self.state {
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Reconnecting { .. } => Err(self.state),
            _ => {
                self.begin();
                Ok(())
            }
        }
    }

    pub fn on_connected(&mut self) {
        self.attempts = 0;
        self.set(ConnectionState::Connected);
    }

    /// A connect attempt failed or a live connection dropped. Returns the
    /// delay before the next automatic attempt, or `None` if the machine
    /// gave up (or was deliberately disconnected meanwhile).
    pub fn on_failure(&mut self) -> Option<Duration> {
        if matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Failed
        ) {
            return None;
        }
        self.attempts += 1;
        match self.policy.delay_for(self.attempts) {
            Some(delay) => {
                self.set(ConnectionState::Reconnecting {
                    attempt: self.attempts,
                });
                Some(delay)
            }
            None => {
                self.set(ConnectionState::Failed);
                None
            }
        }
    }

    /// Deliberate close. Returns the state before the close.
    pub fn on_disconnect(&mut self) -> ConnectionState {
        let previous = self.state;
        self.attempts = 0;
        self.set(ConnectionState::Disconnected);
        previous
    }
}

/// Drive automatic reconnects after a failure.
///
/// Sleeps `first_delay`, runs `attempt`, and repeats with the policy delay
/// until an attempt succeeds (returns `true`) or the machine gives up or
/// is disconnected (returns `false`). `attempt` is responsible for calling
/// `on_connected` when it succeeds.
pub async fn retry_loop<F, Fut, E>(
    machine: &Mutex<ConnectionMachine>,
    first_delay: Duration,
    mut attempt: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    let mut delay = first_delay;
    loop {
        time::sleep(delay).await;

        let state = locked(machine).state();
        let ConnectionState::Reconnecting { attempt: n } = state else {
            tracing::debug!("Reconnect cancelled (state {})", state);
            return false;
        };

        tracing::info!("Reconnect attempt {}", n);
        match attempt().await {
            Ok(()) => return true,
            Err(e) => {
                tracing::warn!("Reconnect attempt {} failed: {:#}", n, e);
                let next = locked(machine).on_failure();
                match next {
                    Some(next) => delay = next,
                    None => {
                        tracing::warn!("Giving up after {} reconnect attempts", n);
                        return false;
                    }
                }
            }
        }
    }
}
