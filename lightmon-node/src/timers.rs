//! Cancellable, restartable timers.
//!
//! Each timer key has at most one live instance. Starting a key that is
//! already pending aborts the old task and bumps a generation counter; fires
//! carry the generation they were armed with, so a fire that was already
//! queued when the timer was restarted or cancelled is discarded.

use std::collections::HashMap;
use std::hash::Hash;

use lightmon_core::Schedule;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

/// Shortest period a periodic timer runs at. `interval` rejects zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct Pending {
    generation: u64,
    periodic: bool,
    task: JoinHandle<()>,
}

/// Set of keyed timers feeding one event loop.
#[derive(Debug)]
pub struct TimerWheel<K> {
    tx: mpsc::UnboundedSender<(K, u64)>,
    rx: mpsc::UnboundedReceiver<(K, u64)>,
    pending: HashMap<K, Pending>,
    next_generation: u64,
}

impl<K> TimerWheel<K>
where
    K: Copy + Eq + Hash + Send + 'static,
{
    /// Create a wheel with no timers.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            pending: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Start `key`, replacing any pending instance.
    pub fn start(&mut self, key: K, schedule: Schedule) {
        self.cancel(key);
        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.tx.clone();

        let task = tokio::spawn(async move {
            time::sleep(schedule.delay).await;
            if tx.send((key, generation)).is_err() {
                return;
            }
            let Some(period) = schedule.period else {
                return;
            };
            let period = period.max(MIN_PERIOD);
            let mut ticks = time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if tx.send((key, generation)).is_err() {
                    return;
                }
            }
        });

        self.pending.insert(
            key,
            Pending {
                generation,
                periodic: schedule.period.is_some(),
                task,
            },
        );
    }

    /// Stop `key` if pending.
    pub fn cancel(&mut self, key: K) {
        if let Some(pending) = self.pending.remove(&key) {
            pending.task.abort();
        }
    }

    /// True while `key` may still fire.
    pub fn is_pending(&self, key: K) -> bool {
        self.pending.contains_key(&key)
    }

    /// Wait for the next live fire. Cancel safe.
    ///
    /// Never resolves while no timer is pending.
    pub async fn next(&mut self) -> K {
        loop {
            // The wheel holds a sender, so the channel never closes
            let Some((key, generation)) = self.rx.recv().await else {
                return std::future::pending().await;
            };

            let Some(pending) = self.pending.get(&key) else {
                continue;
            };
            if pending.generation != generation {
                continue;
            }
            if !pending.periodic {
                self.pending.remove(&key);
            }
            return key;
        }
    }
}

impl<K> Default for TimerWheel<K>
where
    K: Copy + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Drop for TimerWheel<K> {
    fn drop(&mut self) {
        for pending in self.pending.values() {
            pending.task.abort();
        }
    }
}
