//! Fault-injecting transport for deterministic testing.
//!
//! Real networks drop and duplicate datagrams.  To exercise the
//! retransmission paths without depending on actual network conditions,
//! [`Simulator`] wraps another [`Transport`] and intercepts every send,
//! applying a configurable fault model:
//!
//! | Fault            | Description                                          |
//! |------------------|------------------------------------------------------|
//! | Packet loss      | Drop a message with probability `loss_rate`.         |
//! | Duplication      | Deliver a message twice with `duplicate_rate`.       |
//! | Scripted loss    | Drop the next N messages matching a predicate.       |
//!
//! Randomness comes from a seeded [`StdRng`], so a failing run can be
//! reproduced from its seed.  Receives pass straight through.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::packet::Message;
use crate::socket::{Recv, SocketError, Transport};

/// Configuration for the fault-injection model.
///
/// Probabilities are clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given message is silently dropped.
    pub loss_rate: f64,
    /// Probability that a delivered message is sent twice.
    pub duplicate_rate: f64,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            seed: 0,
        }
    }
}

/// Counters of what the simulator did to outgoing traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub sent: u64,
    pub dropped: u64,
    pub duplicated: u64,
}

type DropRule = Box<dyn Fn(&Message) -> bool + Send>;

struct Faults {
    rng: StdRng,
    rules: Vec<(DropRule, usize)>,
    stats: SimulatorStats,
}

enum Fate {
    Drop,
    Deliver { twice: bool },
}

/// A fault-injecting wrapper around another transport.
pub struct Simulator<T: Transport> {
    inner: T,
    loss_rate: f64,
    duplicate_rate: f64,
    faults: Mutex<Faults>,
}

impl<T: Transport> Simulator<T> {
    pub fn new(inner: T, config: SimulatorConfig) -> Self {
        Self {
            inner,
            loss_rate: config.loss_rate.clamp(0.0, 1.0),
            duplicate_rate: config.duplicate_rate.clamp(0.0, 1.0),
            faults: Mutex::new(Faults {
                rng: StdRng::seed_from_u64(config.seed),
                rules: Vec::new(),
                stats: SimulatorStats::default(),
            }),
        }
    }

    /// Drop the next `times` outgoing messages for which `pred` holds.
    pub fn drop_next(&self, times: usize, pred: impl Fn(&Message) -> bool + Send + 'static) {
        self.with_faults(|f| f.rules.push((Box::new(pred), times)));
    }

    pub fn stats(&self) -> SimulatorStats {
        self.with_faults(|f| f.stats)
    }

    fn with_faults<R>(&self, op: impl FnOnce(&mut Faults) -> R) -> R {
        match self.faults.lock() {
            Ok(mut faults) => op(&mut faults),
            Err(poisoned) => op(&mut poisoned.into_inner()),
        }
    }

    fn decide(&self, message: &Message) -> Fate {
        let (loss_rate, duplicate_rate) = (self.loss_rate, self.duplicate_rate);
        self.with_faults(|f| {
            f.stats.sent += 1;

            let scripted = f
                .rules
                .iter_mut()
                .find(|(pred, left)| *left > 0 && pred(message));
            if let Some((_, left)) = scripted {
                *left -= 1;
                f.stats.dropped += 1;
                return Fate::Drop;
            }

            if f.rng.random_bool(loss_rate) {
                f.stats.dropped += 1;
                return Fate::Drop;
            }
            let twice = f.rng.random_bool(duplicate_rate);
            if twice {
                f.stats.duplicated += 1;
            }
            Fate::Deliver { twice }
        })
    }
}

impl<T: Transport> Transport for Simulator<T> {
    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    async fn send_to(&self, message: &Message, dest: SocketAddr) -> Result<(), SocketError> {
        match self.decide(message) {
            Fate::Drop => {
                log::trace!("[sim] dropping {message} to {dest}");
                Ok(())
            }
            Fate::Deliver { twice } => {
                self.inner.send_to(message, dest).await?;
                if twice {
                    log::trace!("[sim] duplicating {message} to {dest}");
                    self.inner.send_to(message, dest).await?;
                }
                Ok(())
            }
        }
    }

    async fn recv_within(&self, wait: Option<Duration>) -> Result<Recv, SocketError> {
        self.inner.recv_within(wait).await
    }
}
