//! Coordinator ("client") campaign orchestration.
//!
//! A campaign broadcasts TEST_START, sweeps the roster once asking every
//! node that has not acked for GET_ACK, then waits out the test duration and
//! sweeps the roster once more asking for GET_RESULT. Each sweep sends at
//! most one request per node and ends after exactly one pass, whether or not
//! every node answered.
//!
//! ```text
//! Idle ──start──▶ AckPolling ──pass done──▶ (waiting) ──duration+5s──▶ ResultPolling ──pass done──▶ Idle
//! ```
//!
//! The `running` flag stays set from the broadcast until the result sweep
//! completes, so GET_START from a late node can be answered while waiting.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use lightmon_types::{Message, NodeAddress, Opcode, TestStart};

use crate::roster::{NodeRoster, RosterError, TrackingSet};
use crate::schedule::Schedule;

/// Delay before the first ack poll.
pub const ACK_POLL_DELAY: Duration = Duration::from_secs(2);

/// Interval between ack polls.
pub const ACK_POLL_PERIOD: Duration = Duration::from_millis(500);

/// Extra wait after the test duration before result polling begins.
pub const RESULT_GRACE: Duration = Duration::from_secs(5);

/// Interval between result polls.
pub const RESULT_POLL_PERIOD: Duration = Duration::from_secs(1);

/// Polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Delay before the first ack poll.
    pub ack_delay: Duration,
    /// Interval between ack polls.
    pub ack_period: Duration,
    /// Added to the test duration before result polling.
    pub result_grace: Duration,
    /// Interval between result polls.
    pub result_period: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            ack_delay: ACK_POLL_DELAY,
            ack_period: ACK_POLL_PERIOD,
            result_grace: RESULT_GRACE,
            result_period: RESULT_POLL_PERIOD,
        }
    }
}

/// Polling phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    /// No sweep in progress.
    #[default]
    Idle,
    /// Sweeping the roster for acks.
    AckPolling {
        /// Next roster position to poll.
        index: usize,
    },
    /// Sweeping the roster for results.
    ResultPolling {
        /// Next roster position to poll.
        index: usize,
    },
}

/// Timers owned by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CoordinatorTimer {
    /// Ack sweep tick.
    AckPoll,
    /// Result sweep tick; its first fire starts the sweep.
    ResultPoll,
}

/// Operator commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start a campaign.
    StartCampaign {
        /// Test length in seconds.
        duration: u16,
        /// Campaign timestamp, epoch seconds.
        timestamp: u32,
    },
    /// Broadcast GET_STATUS.
    Status,
    /// Ask a node to replay its log.
    Log(NodeAddress),
    /// Ask a node for an ack.
    Ack(NodeAddress),
    /// Ask a node for its latest result.
    Result(NodeAddress),
    /// Ask a node to recalibrate.
    Calibrate(NodeAddress),
    /// Append a node to the roster.
    AddNode(NodeAddress),
    /// Clear the roster.
    ResetNodes,
}

/// Inputs to the coordinator state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// Operator command.
    Command(Command),
    /// A decoded message arrived from a node.
    Received {
        /// Sender.
        from: NodeAddress,
        /// Message.
        message: Message,
    },
    /// A timer fired.
    TimerFired(CoordinatorTimer),
}

/// Actions the runtime executes, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorAction {
    /// Send to every node.
    Broadcast(Message),
    /// Send to one node.
    Send {
        /// Destination.
        to: NodeAddress,
        /// Message.
        message: Message,
    },
    /// Start (or replace) a timer.
    StartTimer {
        /// Which timer.
        timer: CoordinatorTimer,
        /// When it fires.
        schedule: Schedule,
    },
    /// Stop a timer.
    CancelTimer(CoordinatorTimer),
    /// Tell the operator something happened.
    Report(CoordinatorReport),
}

/// Outcomes collected during one campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignReport {
    /// Test length in seconds.
    pub duration: u16,
    /// Campaign timestamp.
    pub timestamp: u32,
    /// Nodes that acked.
    pub acked: Vec<NodeAddress>,
    /// Outcome per node that reported.
    pub outcomes: BTreeMap<NodeAddress, bool>,
}

impl CampaignReport {
    fn new(duration: u16, timestamp: u32) -> Self {
        Self {
            duration,
            timestamp,
            acked: Vec::new(),
            outcomes: BTreeMap::new(),
        }
    }

    /// Number of nodes that reported a pass.
    pub fn passed(&self) -> usize {
        self.outcomes.values().filter(|p| **p).count()
    }

    /// Number of nodes that reported a failure.
    pub fn failed(&self) -> usize {
        self.outcomes.values().filter(|p| !**p).count()
    }
}

/// Diagnostics and replies surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordinatorReport {
    /// Campaign broadcast sent.
    CampaignStarted {
        /// Test length in seconds.
        duration: u16,
        /// Campaign timestamp.
        timestamp: u32,
    },
    /// Start rejected because a campaign is running.
    AlreadyRunning,
    /// A poll request was sent.
    Polled {
        /// Node polled.
        node: NodeAddress,
        /// Request sent.
        request: Opcode,
    },
    /// Roster slot holds the sentinel address.
    EmptySlot {
        /// Roster position.
        index: usize,
    },
    /// A sweep started with an empty roster.
    EmptyRoster,
    /// Ack sweep finished.
    AckPhaseEnded {
        /// Nodes that acked during the sweep.
        acked: usize,
        /// True when the result sweep cut it short.
        interrupted: bool,
    },
    /// Result sweep started.
    ResultPhaseStarted,
    /// Result sweep finished; campaign over.
    CampaignFinished(CampaignReport),
    /// TEST_ACK received.
    Acked {
        /// Sender.
        node: NodeAddress,
    },
    /// TEST_RESULT received.
    TestResult {
        /// Sender.
        node: NodeAddress,
        /// Outcome.
        passed: bool,
    },
    /// RESULT_LOG received.
    LogEntry {
        /// Sender.
        node: NodeAddress,
        /// Outcome.
        passed: bool,
        /// Campaign timestamp of the entry.
        timestamp: u32,
    },
    /// UPDATE_STATUS received.
    Status {
        /// Sender.
        node: NodeAddress,
        /// Latest raw sample.
        value: u16,
    },
    /// CALIBRATE_OK received.
    Calibrated {
        /// Sender.
        node: NodeAddress,
    },
    /// TEST_START re-sent to a node that asked for it.
    Restarted {
        /// Node that asked.
        node: NodeAddress,
    },
    /// GET_START received with no campaign running.
    NoCampaign {
        /// Node that asked.
        node: NodeAddress,
    },
    /// Roster add rejected.
    RosterFull {
        /// Roster capacity.
        capacity: usize,
    },
    /// Roster changed.
    RosterChanged {
        /// New length.
        len: usize,
    },
    /// Message a coordinator does not handle.
    Unexpected {
        /// Sender.
        node: NodeAddress,
        /// Opcode received.
        opcode: Opcode,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Campaign {
    duration: u16,
    timestamp: u32,
}

/// Complete protocol state of the coordinator.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    settings: OrchestratorSettings,
    roster: NodeRoster,
    phase: Phase,
    campaign: Option<Campaign>,
    acked: TrackingSet,
    resulted: TrackingSet,
    report: Option<CampaignReport>,
    last_report: Option<CampaignReport>,
}

impl Orchestrator {
    /// Create an idle coordinator with an empty roster.
    pub fn new(settings: OrchestratorSettings) -> Self {
        Self::with_roster(settings, NodeRoster::new())
    }

    /// Create an idle coordinator with a prepared roster.
    pub fn with_roster(settings: OrchestratorSettings, roster: NodeRoster) -> Self {
        Self {
            settings,
            roster,
            phase: Phase::Idle,
            campaign: None,
            acked: TrackingSet::new(),
            resulted: TrackingSet::new(),
            report: None,
            last_report: None,
        }
    }

    /// Process an event and return the actions to execute.
    pub fn on_event(&mut self, event: CoordinatorEvent) -> Vec<CoordinatorAction> {
        match event {
            CoordinatorEvent::Command(command) => self.on_command(command),
            CoordinatorEvent::Received { from, message } => self.on_message(from, message),
            CoordinatorEvent::TimerFired(CoordinatorTimer::AckPoll) => self.on_ack_tick(),
            CoordinatorEvent::TimerFired(CoordinatorTimer::ResultPoll) => self.on_result_tick(),
        }
    }

    fn on_command(&mut self, command: Command) -> Vec<CoordinatorAction> {
        match command {
            Command::StartCampaign {
                duration,
                timestamp,
            } => self.start_campaign(duration, timestamp),
            Command::Status => vec![CoordinatorAction::Broadcast(Message::GetStatus)],
            Command::Log(to) => send(to, Message::GetLog),
            Command::Ack(to) => send(to, Message::GetAck),
            Command::Result(to) => send(to, Message::GetResult),
            Command::Calibrate(to) => send(to, Message::Calibrate),
            Command::AddNode(address) => match self.roster.push(address) {
                Ok(()) => notify(CoordinatorReport::RosterChanged {
                    len: self.roster.len(),
                }),
                Err(RosterError::Full { capacity }) => {
                    notify(CoordinatorReport::RosterFull { capacity })
                }
            },
            Command::ResetNodes => {
                self.roster.clear();
                notify(CoordinatorReport::RosterChanged { len: 0 })
            }
        }
    }

    fn start_campaign(&mut self, duration: u16, timestamp: u32) -> Vec<CoordinatorAction> {
        if self.campaign.is_some() {
            return notify(CoordinatorReport::AlreadyRunning);
        }

        self.campaign = Some(Campaign {
            duration,
            timestamp,
        });
        self.report = Some(CampaignReport::new(duration, timestamp));
        self.acked.clear();
        self.resulted.clear();
        self.phase = Phase::AckPolling { index: 0 };

        let result_delay = Duration::from_secs(u64::from(duration)) + self.settings.result_grace;
        vec![
            CoordinatorAction::Broadcast(Message::TestStart(TestStart {
                duration,
                timestamp,
            })),
            CoordinatorAction::StartTimer {
                timer: CoordinatorTimer::AckPoll,
                schedule: Schedule::after_then_every(
                    self.settings.ack_delay,
                    self.settings.ack_period,
                ),
            },
            CoordinatorAction::StartTimer {
                timer: CoordinatorTimer::ResultPoll,
                schedule: Schedule::after_then_every(result_delay, self.settings.result_period),
            },
            CoordinatorAction::Report(CoordinatorReport::CampaignStarted {
                duration,
                timestamp,
            }),
        ]
    }

    fn on_message(&mut self, from: NodeAddress, message: Message) -> Vec<CoordinatorAction> {
        match message {
            Message::TestAck => {
                self.acked.mark(from);
                if let Some(report) = self.report.as_mut() {
                    if !report.acked.contains(&from) {
                        report.acked.push(from);
                    }
                }
                notify(CoordinatorReport::Acked { node: from })
            }
            Message::TestResult(result) => {
                self.resulted.mark(from);
                if let Some(report) = self.report.as_mut() {
                    report.outcomes.insert(from, result.passed);
                }
                notify(CoordinatorReport::TestResult {
                    node: from,
                    passed: result.passed,
                })
            }
            Message::ResultLog(entry) => notify(CoordinatorReport::LogEntry {
                node: from,
                passed: entry.passed,
                timestamp: entry.timestamp,
            }),
            Message::UpdateStatus(status) => notify(CoordinatorReport::Status {
                node: from,
                value: status.value,
            }),
            Message::CalibrateOk => notify(CoordinatorReport::Calibrated { node: from }),
            Message::GetStart => match self.campaign {
                Some(Campaign {
                    duration,
                    timestamp,
                }) => vec![
                    CoordinatorAction::Send {
                        to: from,
                        message: Message::TestStart(TestStart {
                            duration,
                            timestamp,
                        }),
                    },
                    CoordinatorAction::Report(CoordinatorReport::Restarted { node: from }),
                ],
                None => notify(CoordinatorReport::NoCampaign { node: from }),
            },
            other => notify(CoordinatorReport::Unexpected {
                node: from,
                opcode: other.opcode(),
            }),
        }
    }

    fn on_ack_tick(&mut self) -> Vec<CoordinatorAction> {
        let Phase::AckPolling { index } = self.phase else {
            return vec![CoordinatorAction::CancelTimer(CoordinatorTimer::AckPoll)];
        };

        let mut actions = self.poll_slot(index, Message::GetAck);
        let next = index + 1;
        if next >= self.roster.len() {
            actions.extend(self.end_ack_phase(false));
        } else {
            self.phase = Phase::AckPolling { index: next };
        }
        actions
    }

    fn end_ack_phase(&mut self, interrupted: bool) -> Vec<CoordinatorAction> {
        let acked = self.acked.len();
        self.acked.clear();
        self.phase = Phase::Idle;
        vec![
            CoordinatorAction::CancelTimer(CoordinatorTimer::AckPoll),
            CoordinatorAction::Report(CoordinatorReport::AckPhaseEnded { acked, interrupted }),
        ]
    }

    fn on_result_tick(&mut self) -> Vec<CoordinatorAction> {
        if self.campaign.is_none() {
            return vec![CoordinatorAction::CancelTimer(CoordinatorTimer::ResultPoll)];
        }

        let mut actions = Vec::new();
        let index = match self.phase {
            Phase::ResultPolling { index } => index,
            Phase::AckPolling { .. } => {
                actions.extend(self.end_ack_phase(true));
                actions.push(CoordinatorAction::Report(
                    CoordinatorReport::ResultPhaseStarted,
                ));
                0
            }
            Phase::Idle => {
                actions.push(CoordinatorAction::Report(
                    CoordinatorReport::ResultPhaseStarted,
                ));
                0
            }
        };

        actions.extend(self.poll_slot(index, Message::GetResult));
        let next = index + 1;
        if next >= self.roster.len() {
            actions.extend(self.finish_campaign());
        } else {
            self.phase = Phase::ResultPolling { index: next };
        }
        actions
    }

    fn finish_campaign(&mut self) -> Vec<CoordinatorAction> {
        self.phase = Phase::Idle;
        self.campaign = None;
        self.resulted.clear();

        let mut actions = vec![CoordinatorAction::CancelTimer(CoordinatorTimer::ResultPoll)];
        if let Some(report) = self.report.take() {
            self.last_report = Some(report.clone());
            actions.push(CoordinatorAction::Report(
                CoordinatorReport::CampaignFinished(report),
            ));
        }
        actions
    }

    /// Poll one roster slot unless it is empty or already answered.
    fn poll_slot(&self, index: usize, request: Message) -> Vec<CoordinatorAction> {
        let Some(node) = self.roster.get(index) else {
            return notify(CoordinatorReport::EmptyRoster);
        };
        if node.is_unassigned() {
            return notify(CoordinatorReport::EmptySlot { index });
        }

        let answered = match request {
            Message::GetAck => self.acked.contains(node),
            _ => self.resulted.contains(node),
        };
        if answered {
            return Vec::new();
        }

        vec![
            CoordinatorAction::Send {
                to: node,
                message: request,
            },
            CoordinatorAction::Report(CoordinatorReport::Polled {
                node,
                request: request.opcode(),
            }),
        ]
    }

    /// Current polling phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True from campaign start until the result sweep completes.
    pub fn is_running(&self) -> bool {
        self.campaign.is_some()
    }

    /// The roster.
    pub fn roster(&self) -> &NodeRoster {
        &self.roster
    }

    /// Nodes that acked in the current ack sweep.
    pub fn acked(&self) -> &TrackingSet {
        &self.acked
    }

    /// Nodes that reported in the current result sweep.
    pub fn resulted(&self) -> &TrackingSet {
        &self.resulted
    }

    /// Report of the campaign in progress.
    pub fn current_report(&self) -> Option<&CampaignReport> {
        self.report.as_ref()
    }

    /// Report of the most recently finished campaign.
    pub fn last_report(&self) -> Option<&CampaignReport> {
        self.last_report.as_ref()
    }
}

fn send(to: NodeAddress, message: Message) -> Vec<CoordinatorAction> {
    vec![CoordinatorAction::Send { to, message }]
}

fn notify(report: CoordinatorReport) -> Vec<CoordinatorAction> {
    vec![CoordinatorAction::Report(report)]
}
