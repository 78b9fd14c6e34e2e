//! RFC 3261 transaction timers.
//!
//! [`TimerSettings`] derives every timer duration from T1, T2 and T4, taking
//! the reliability of the transport into account (§17.1.1.2, §17.1.2.2,
//! §17.2.1, §17.2.2). [`TimerSet`] owns the running timers of one
//! transaction: each timer is a spawned sleep that posts a
//! [`InternalTransactionCommand::Timer`] into the transaction's own command
//! loop, tagged with a generation so that a fire racing with cancellation or
//! re-arming is recognised as stale.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::config::duration_ms;
use crate::transaction::InternalTransactionCommand;

/// Transaction timers, plus Timer 100 which sends an automatic
/// `100 Trying` for INVITE server transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerType {
    A,
    B,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    Trying100,
}

impl TimerType {
    /// Timeouts end the transaction without a final response
    pub fn is_timeout(&self) -> bool {
        matches!(self, TimerType::B | TimerType::F | TimerType::H)
    }
}

impl fmt::Display for TimerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerType::Trying100 => f.write_str("100"),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

/// Base timer values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    /// RTT estimate
    #[serde(with = "duration_ms", rename = "t1_ms")]
    pub t1: Duration,
    /// Maximum retransmission interval for non-INVITE requests and INVITE
    /// responses
    #[serde(with = "duration_ms", rename = "t2_ms")]
    pub t2: Duration,
    /// Maximum time a message remains in the network
    #[serde(with = "duration_ms", rename = "t4_ms")]
    pub t4: Duration,
    /// Delay before an INVITE server transaction answers `100 Trying` on
    /// behalf of a slow TU
    #[serde(with = "duration_ms", rename = "timer_100_ms")]
    pub timer_100: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            timer_100: Duration::from_millis(200),
        }
    }
}

impl TimerSettings {
    /// 64*T1
    pub fn transaction_timeout(&self) -> Duration {
        self.t1.saturating_mul(64)
    }

    /// Next retransmission interval: doubled, capped at T2 when `capped`
    pub fn next_interval(&self, current: Duration, capped: bool) -> Duration {
        let doubled = current.saturating_mul(2);
        if capped {
            doubled.min(self.t2)
        } else {
            doubled
        }
    }

    /// Initial duration of `timer`; zero means the timer is not armed and its
    /// transition happens immediately
    pub fn duration(&self, timer: TimerType, reliable: bool) -> Duration {
        let unless_reliable = |d: Duration| if reliable { Duration::ZERO } else { d };
        match timer {
            TimerType::A | TimerType::E | TimerType::G => unless_reliable(self.t1),
            TimerType::B | TimerType::F | TimerType::H => self.transaction_timeout(),
            TimerType::D => unless_reliable(Duration::from_secs(32).max(self.transaction_timeout())),
            TimerType::I | TimerType::K => unless_reliable(self.t4),
            TimerType::J => unless_reliable(self.transaction_timeout()),
            TimerType::Trying100 => self.timer_100,
        }
    }
}

/// Running timers of one transaction
#[derive(Debug, Default)]
pub struct TimerSet {
    active: HashMap<TimerType, (u64, JoinHandle<()>)>,
    generation: u64,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `timer`, replacing a running instance, and returns its generation
    pub fn start(
        &mut self,
        timer: TimerType,
        after: Duration,
        cmd_tx: mpsc::Sender<InternalTransactionCommand>,
    ) -> u64 {
        self.cancel(timer);
        self.generation += 1;
        let generation = self.generation;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = cmd_tx
                .send(InternalTransactionCommand::Timer { timer, generation })
                .await;
        });
        trace!(%timer, ?after, generation, "Timer armed");
        self.active.insert(timer, (generation, handle));
        generation
    }

    pub fn cancel(&mut self, timer: TimerType) {
        if let Some((_, handle)) = self.active.remove(&timer) {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.active.drain() {
            handle.abort();
        }
    }

    pub fn is_active(&self, timer: TimerType) -> bool {
        self.active.contains_key(&timer)
    }

    /// Consumes a fire. Returns `false` for a stale generation, in which case
    /// the fire must be ignored.
    pub fn fired(&mut self, timer: TimerType, generation: u64) -> bool {
        match self.active.get(&timer) {
            Some((current, _)) if *current == generation => {
                self.active.remove(&timer);
                true
            }
            _ => false,
        }
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
