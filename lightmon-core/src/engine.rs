//! Test engine state machine for a sensor node.
//!
//! The engine is either idle or running one campaign. It takes inputs and
//! returns the new state plus a [`Step`] describing what happened; the
//! surrounding [`TestServer`](crate::TestServer) turns steps into actions.
//! Finalizing is not a separate state: the tick that ends a campaign
//! returns straight to `Idle` with the finished entry.

use crate::result_log::ResultEntry;

/// Engine state - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TestEngine {
    /// No campaign running.
    #[default]
    Idle,
    /// A campaign is sampling.
    Running(ActiveTest),
}

/// Data carried by a running campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveTest {
    /// Timestamp recorded from TEST_START.
    pub timestamp: u32,
    /// Sample ticks left.
    pub remaining: u16,
    /// False once any sample exceeded the threshold.
    pub passed: bool,
}

/// What an engine input did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Campaign started.
    Started,
    /// TEST_START while running; ignored.
    Busy,
    /// Sample judged, campaign continues.
    Continue {
        /// Ticks left after this one.
        remaining: u16,
    },
    /// Campaign finished; the entry must be logged.
    Finished(ResultEntry),
    /// Input ignored because no campaign is running.
    NotRunning,
}

impl TestEngine {
    /// Create an idle engine.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Handle TEST_START.
    pub fn start(self, duration: u16, timestamp: u32) -> (Self, Step) {
        match self {
            Self::Idle => (
                Self::Running(ActiveTest {
                    timestamp,
                    remaining: duration,
                    passed: true,
                }),
                Step::Started,
            ),
            running @ Self::Running(_) => (running, Step::Busy),
        }
    }

    /// Handle one sample tick.
    ///
    /// The first sample above the threshold fails the campaign and ends it
    /// on the spot. Otherwise the tick is counted and the campaign ends once
    /// no ticks remain.
    pub fn sample(self, failed: bool) -> (Self, Step) {
        let Self::Running(mut test) = self else {
            return (self, Step::NotRunning);
        };

        if failed {
            test.passed = false;
            return (Self::Idle, Step::Finished(test.finish()));
        }

        test.remaining = test.remaining.saturating_sub(1);
        if test.remaining == 0 {
            (Self::Idle, Step::Finished(test.finish()))
        } else {
            let remaining = test.remaining;
            (Self::Running(test), Step::Continue { remaining })
        }
    }

    /// Check if a campaign is running.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running(_))
    }

    /// The running campaign, if any.
    pub fn active(&self) -> Option<&ActiveTest> {
        match self {
            Self::Running(test) => Some(test),
            Self::Idle => None,
        }
    }
}

impl ActiveTest {
    fn finish(&self) -> ResultEntry {
        ResultEntry::new(self.passed, self.timestamp)
    }
}
