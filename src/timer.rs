//! Protocol timings and deadline bookkeeping.
//!
//! RDP has no adaptive RTO: every wait is a fixed timeout taken from
//! [`TimerConfig`].
//! - `ack_timeout` bounds one attempt of [`crate::sender::send_until_ack`];
//!   `retry_budget` bounds how many times the message is re-sent.
//! - `connection_timeout` is how long a connected server waits for the
//!   peer's next message before abandoning it.
//! - `fin_keep_alive` is how long a client lingers after answering the
//!   server's FIN, re-answering duplicates.
//!
//! [`Deadline`] turns a total wait into successive per-read budgets, so a
//! stream of unwanted datagrams cannot extend a wait past its limit.

use std::time::Duration;

use tokio::time::Instant;

/// Default per-attempt acknowledgment timeout.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);
/// Default number of retransmissions after the first send.
pub const DEFAULT_RETRY_BUDGET: u32 = 5;
/// Default server read timeout while a connection is live.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Adjustable timeout parameters shared by server and client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    pub ack_timeout: Duration,
    pub retry_budget: u32,
    pub connection_timeout: Duration,
    pub fin_keep_alive: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            retry_budget: DEFAULT_RETRY_BUDGET,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            fin_keep_alive: DEFAULT_ACK_TIMEOUT * 2,
        }
    }
}

impl TimerConfig {
    /// Replace the ack timeout; the FIN keep-alive window follows it at 2×.
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self.fin_keep_alive = ack_timeout * 2;
        self
    }

    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    pub fn with_connection_timeout(mut self, connection_timeout: Duration) -> Self {
        self.connection_timeout = connection_timeout;
        self
    }

    /// Total transmissions of one message: the first send plus retries.
    pub fn max_attempts(&self) -> u32 {
        self.retry_budget + 1
    }

    /// How long a client waits for the next chunk before giving up on the
    /// server: `ack_timeout × retry_budget`, and never less than one
    /// `ack_timeout`.
    pub fn stream_timeout(&self) -> Duration {
        (self.ack_timeout * self.retry_budget).max(self.ack_timeout)
    }
}

/// A fixed point in time after which a wait is over.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(wait: Duration) -> Self {
        Self {
            at: Instant::now() + wait,
        }
    }

    /// Time left before the deadline, or `None` once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        let left = self.at.saturating_duration_since(Instant::now());
        (!left.is_zero()).then_some(left)
    }
}
