//! Timer requests returned by the state machines.

use std::time::Duration;

/// When a timer should fire.
///
/// The runtime owns the real timers. Starting a timer that is already
/// pending replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Delay before the first fire.
    pub delay: Duration,
    /// Interval between later fires; `None` for one-shot timers.
    pub period: Option<Duration>,
}

impl Schedule {
    /// Fire once after `delay`.
    pub fn once(delay: Duration) -> Self {
        Self {
            delay,
            period: None,
        }
    }

    /// Fire every `period`, first after one period.
    pub fn every(period: Duration) -> Self {
        Self {
            delay: period,
            period: Some(period),
        }
    }

    /// Fire first after `delay`, then every `period`.
    pub fn after_then_every(delay: Duration, period: Duration) -> Self {
        Self {
            delay,
            period: Some(period),
        }
    }
}
