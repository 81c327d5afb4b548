//! Sensor node ("server") protocol logic.
//!
//! [`TestServer`] owns everything a node keeps: the test engine, the result
//! log, the calibration threshold, the latest sample and the replay cursor.
//! It reacts to inbound messages, timer fires and sensor readings, and returns
//! the actions the runtime must carry out. Nothing here touches I/O, so one
//! test process can drive any number of simulated nodes.
//!
//! Sensor reads are requested with [`ServerAction::ReadSensor`]; the runtime
//! performs the read and feeds the value back as [`ServerEvent::Sampled`] (or
//! [`ServerEvent::SampleFailed`]) before handling the next event.

use std::time::Duration;

use lightmon_types::{LoggedResult, Message, Opcode, StatusUpdate, TestResult, TestStart};

use crate::calibration::Calibration;
use crate::engine::{Step, TestEngine};
use crate::replay::{LogReplay, ReplayStep};
use crate::result_log::{ResultEntry, ResultLog};
use crate::schedule::Schedule;

/// Period of the sampling tick while a campaign runs.
pub const SAMPLE_PERIOD: Duration = Duration::from_secs(1);

/// Period of the log replay tick.
pub const REPLAY_PERIOD: Duration = Duration::from_millis(50);

/// Timers owned by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServerTimer {
    /// Sampling tick of the running campaign.
    Sample,
    /// Log replay tick.
    Replay,
}

/// Why a sensor read was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplePurpose {
    /// Campaign sampling tick.
    Test,
    /// One-shot recalibration.
    Calibration,
}

/// Tunables for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Threshold and margin at boot.
    pub calibration: Calibration,
    /// Sampling tick period.
    pub sample_period: Duration,
    /// Replay tick period.
    pub replay_period: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            calibration: Calibration::default(),
            sample_period: SAMPLE_PERIOD,
            replay_period: REPLAY_PERIOD,
        }
    }
}

/// Inputs to the node state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A decoded message arrived.
    Received(Message),
    /// A timer fired.
    TimerFired(ServerTimer),
    /// A requested sensor read succeeded.
    Sampled {
        /// What the read was for.
        purpose: SamplePurpose,
        /// Raw reading.
        value: u16,
    },
    /// A requested sensor read failed.
    SampleFailed {
        /// What the read was for.
        purpose: SamplePurpose,
        /// Error message from the sensor.
        error: String,
    },
}

/// Actions the runtime executes, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    /// Send to the node's publish destination.
    Publish(Message),
    /// Read the sensor and feed back the result.
    ReadSensor(SamplePurpose),
    /// Drive the physical test indicator.
    SetIndicator(bool),
    /// Write the log to durable storage.
    PersistLog(ResultLog),
    /// Start (or replace) a timer.
    StartTimer {
        /// Which timer.
        timer: ServerTimer,
        /// When it fires.
        schedule: Schedule,
    },
    /// Stop a timer.
    CancelTimer(ServerTimer),
    /// Tell the operator something happened.
    Report(ServerReport),
}

/// Diagnostics and notable transitions on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerReport {
    /// A campaign started.
    TestStarted {
        /// Campaign length in seconds.
        duration: u16,
        /// Campaign timestamp.
        timestamp: u32,
    },
    /// TEST_START ignored because a campaign is running.
    Busy,
    /// A campaign finished and was logged.
    Finalized {
        /// The logged entry.
        entry: ResultEntry,
        /// Slot it was written to.
        index: usize,
    },
    /// GET_ACK arrived while idle; a GET_START solicitation was sent.
    AckUnavailable,
    /// The sensor could not be read.
    SensorFault {
        /// What the read was for.
        purpose: SamplePurpose,
        /// Error message.
        error: String,
    },
    /// Threshold recalibrated.
    Calibrated {
        /// Sample used.
        sample: u16,
        /// New threshold.
        threshold: u16,
    },
    /// Replay skipped a never-written slot.
    EmptyLogSlot(usize),
    /// Replay completed a full circle.
    ReplayFinished,
    /// Message not handled by a node.
    Ignored(Opcode),
}

/// Complete protocol state of one sensor node.
#[derive(Debug, Clone)]
pub struct TestServer {
    settings: ServerSettings,
    engine: TestEngine,
    log: ResultLog,
    calibration: Calibration,
    last_sample: u16,
    replay: LogReplay,
}

impl TestServer {
    /// Create a node with an empty log.
    pub fn new(settings: ServerSettings) -> Self {
        Self::with_log(settings, ResultLog::new())
    }

    /// Create a node with a log reloaded from storage.
    pub fn with_log(settings: ServerSettings, log: ResultLog) -> Self {
        Self {
            settings,
            engine: TestEngine::new(),
            log,
            calibration: settings.calibration,
            last_sample: 0,
            replay: LogReplay::new(),
        }
    }

    /// Process an event and return the actions to execute.
    pub fn on_event(&mut self, event: ServerEvent) -> Vec<ServerAction> {
        match event {
            ServerEvent::Received(message) => self.on_message(message),
            ServerEvent::TimerFired(ServerTimer::Sample) => {
                if self.engine.is_running() {
                    vec![ServerAction::ReadSensor(SamplePurpose::Test)]
                } else {
                    vec![ServerAction::CancelTimer(ServerTimer::Sample)]
                }
            }
            ServerEvent::TimerFired(ServerTimer::Replay) => self.on_replay_tick(),
            ServerEvent::Sampled { purpose, value } => {
                self.last_sample = value;
                match purpose {
                    SamplePurpose::Test => self.on_test_sample(value),
                    SamplePurpose::Calibration => {
                        let threshold = self.calibration.apply(value);
                        vec![
                            ServerAction::Publish(Message::CalibrateOk),
                            ServerAction::Report(ServerReport::Calibrated {
                                sample: value,
                                threshold,
                            }),
                        ]
                    }
                }
            }
            ServerEvent::SampleFailed { purpose, error } => {
                vec![ServerAction::Report(ServerReport::SensorFault { purpose, error })]
            }
        }
    }

    fn on_message(&mut self, message: Message) -> Vec<ServerAction> {
        match message {
            Message::TestStart(TestStart {
                duration,
                timestamp,
            }) => {
                let (engine, step) = self.engine.start(duration, timestamp);
                self.engine = engine;
                match step {
                    Step::Started => vec![
                        ServerAction::SetIndicator(true),
                        ServerAction::Publish(Message::TestAck),
                        ServerAction::StartTimer {
                            timer: ServerTimer::Sample,
                            schedule: Schedule::every(self.settings.sample_period),
                        },
                        ServerAction::Report(ServerReport::TestStarted {
                            duration,
                            timestamp,
                        }),
                    ],
                    _ => vec![ServerAction::Report(ServerReport::Busy)],
                }
            }
            Message::GetStatus => vec![ServerAction::Publish(Message::UpdateStatus(
                StatusUpdate {
                    value: self.last_sample,
                },
            ))],
            Message::GetAck => {
                if self.engine.is_running() {
                    vec![ServerAction::Publish(Message::TestAck)]
                } else {
                    vec![
                        ServerAction::Publish(Message::GetStart),
                        ServerAction::Report(ServerReport::AckUnavailable),
                    ]
                }
            }
            Message::GetResult => vec![ServerAction::Publish(Message::TestResult(TestResult {
                passed: self.log.latest().passed,
            }))],
            Message::GetLog => {
                let newest = self.replay.start(&self.log);
                vec![
                    ServerAction::Publish(logged(newest)),
                    ServerAction::StartTimer {
                        timer: ServerTimer::Replay,
                        schedule: Schedule::every(self.settings.replay_period),
                    },
                ]
            }
            Message::Calibrate => vec![ServerAction::ReadSensor(SamplePurpose::Calibration)],
            other => vec![ServerAction::Report(ServerReport::Ignored(other.opcode()))],
        }
    }

    fn on_test_sample(&mut self, value: u16) -> Vec<ServerAction> {
        let failed = self.calibration.is_failure(value);
        let (engine, step) = self.engine.sample(failed);
        self.engine = engine;

        match step {
            Step::Finished(entry) => {
                let index = self.log.append(entry);
                vec![
                    ServerAction::CancelTimer(ServerTimer::Sample),
                    ServerAction::SetIndicator(false),
                    ServerAction::PersistLog(self.log.clone()),
                    ServerAction::Publish(Message::TestResult(TestResult {
                        passed: entry.passed,
                    })),
                    ServerAction::Report(ServerReport::Finalized { entry, index }),
                ]
            }
            _ => Vec::new(),
        }
    }

    fn on_replay_tick(&mut self) -> Vec<ServerAction> {
        match self.replay.tick(&self.log) {
            ReplayStep::Emit(entry) => vec![ServerAction::Publish(logged(entry))],
            ReplayStep::Skip(index) => {
                vec![ServerAction::Report(ServerReport::EmptyLogSlot(index))]
            }
            ReplayStep::Done => vec![
                ServerAction::CancelTimer(ServerTimer::Replay),
                ServerAction::Report(ServerReport::ReplayFinished),
            ],
            ReplayStep::Idle => vec![ServerAction::CancelTimer(ServerTimer::Replay)],
        }
    }

    /// The test engine state.
    pub fn engine(&self) -> &TestEngine {
        &self.engine
    }

    /// The result log.
    pub fn log(&self) -> &ResultLog {
        &self.log
    }

    /// Current failure threshold.
    pub fn threshold(&self) -> u16 {
        self.calibration.threshold()
    }

    /// Latest raw sample.
    pub fn last_sample(&self) -> u16 {
        self.last_sample
    }
}

fn logged(entry: ResultEntry) -> Message {
    Message::ResultLog(LoggedResult {
        passed: entry.passed,
        timestamp: entry.timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> TestServer {
        TestServer::new(ServerSettings::default())
    }

    fn start(duration: u16, timestamp: u32) -> ServerEvent {
        ServerEvent::Received(Message::TestStart(TestStart {
            duration,
            timestamp,
        }))
    }

    fn published(actions: &[ServerAction]) -> Vec<Message> {
        actions
            .iter()
            .filter_map(|a| match a {
                ServerAction::Publish(m) => Some(*m),
                _ => None,
            })
            .collect()
    }

    /// Fire the sample timer and feed back a reading, like the runtime does.
    fn tick(server: &mut TestServer, value: u16) -> Vec<ServerAction> {
        let actions = server.on_event(ServerEvent::TimerFired(ServerTimer::Sample));
        assert_eq!(actions, vec![ServerAction::ReadSensor(SamplePurpose::Test)]);
        server.on_event(ServerEvent::Sampled {
            purpose: SamplePurpose::Test,
            value,
        })
    }

    #[test]
    fn test_start_acks_and_arms_sampling() {
        let mut server = server();
        let actions = server.on_event(start(60, 1000));

        assert!(actions.contains(&ServerAction::SetIndicator(true)));
        assert_eq!(published(&actions), vec![Message::TestAck]);
        assert!(actions.contains(&ServerAction::StartTimer {
            timer: ServerTimer::Sample,
            schedule: Schedule::every(Duration::from_secs(1)),
        }));
        assert!(server.engine().is_running());
    }

    #[test]
    fn busy_guard_is_idempotent() {
        let mut server = server();
        server.on_event(start(10, 1000));
        tick(&mut server, 100);
        let before = *server.engine();

        let actions = server.on_event(start(60, 2000));
        assert_eq!(actions, vec![ServerAction::Report(ServerReport::Busy)]);
        assert_eq!(*server.engine(), before);
        assert_eq!(server.engine().active().unwrap().remaining, 9);
        assert_eq!(server.engine().active().unwrap().timestamp, 1000);
    }

    #[test]
    fn early_exit_on_third_tick() {
        let mut server = server();
        server.on_event(start(10, 1000));

        assert!(published(&tick(&mut server, 100)).is_empty());
        assert!(published(&tick(&mut server, 100)).is_empty());
        let actions = tick(&mut server, 4000);

        assert_eq!(
            published(&actions),
            vec![Message::TestResult(TestResult { passed: false })]
        );
        assert!(actions.contains(&ServerAction::CancelTimer(ServerTimer::Sample)));
        assert!(actions.contains(&ServerAction::SetIndicator(false)));
        assert!(!server.engine().is_running());
        assert_eq!(server.log().latest(), ResultEntry::new(false, 1000));
    }

    #[test]
    fn passing_campaign_is_logged_and_persisted() {
        let mut server = server();
        server.on_event(start(2, 1000));
        tick(&mut server, 100);
        let actions = tick(&mut server, 100);

        let persisted = actions.iter().find_map(|a| match a {
            ServerAction::PersistLog(log) => Some(log.clone()),
            _ => None,
        });
        assert_eq!(persisted.unwrap().latest(), ResultEntry::new(true, 1000));
        assert_eq!(
            published(&actions),
            vec![Message::TestResult(TestResult { passed: true })]
        );

        // Ready for the next campaign
        let actions = server.on_event(start(2, 2000));
        assert_eq!(published(&actions), vec![Message::TestAck]);
    }

    #[test]
    fn sensor_fault_does_not_count_the_tick() {
        let mut server = server();
        server.on_event(start(2, 1000));
        server.on_event(ServerEvent::TimerFired(ServerTimer::Sample));
        let actions = server.on_event(ServerEvent::SampleFailed {
            purpose: SamplePurpose::Test,
            error: "adc busy".into(),
        });

        assert!(matches!(
            actions.as_slice(),
            [ServerAction::Report(ServerReport::SensorFault { .. })]
        ));
        assert_eq!(server.engine().active().unwrap().remaining, 2);
    }

    #[test]
    fn stale_sample_timer_is_cancelled() {
        let mut server = server();
        let actions = server.on_event(ServerEvent::TimerFired(ServerTimer::Sample));
        assert_eq!(actions, vec![ServerAction::CancelTimer(ServerTimer::Sample)]);
    }

    #[test]
    fn get_ack_depends_on_state() {
        let mut server = server();

        let idle = server.on_event(ServerEvent::Received(Message::GetAck));
        assert_eq!(published(&idle), vec![Message::GetStart]);
        assert!(idle.contains(&ServerAction::Report(ServerReport::AckUnavailable)));

        server.on_event(start(10, 1000));
        let running = server.on_event(ServerEvent::Received(Message::GetAck));
        assert_eq!(running, vec![ServerAction::Publish(Message::TestAck)]);
    }

    #[test]
    fn get_status_reports_latest_sample() {
        let mut server = server();
        server.on_event(start(10, 1000));
        tick(&mut server, 1234);

        let actions = server.on_event(ServerEvent::Received(Message::GetStatus));
        assert_eq!(
            published(&actions),
            vec![Message::UpdateStatus(StatusUpdate { value: 1234 })]
        );
        assert!(server.engine().is_running());
    }

    #[test]
    fn get_result_uses_latest_log_entry() {
        let mut server = server();
        server.on_event(start(1, 1000));
        tick(&mut server, 9999);

        // Running again does not change the answer
        server.on_event(start(10, 2000));
        let actions = server.on_event(ServerEvent::Received(Message::GetResult));
        assert_eq!(
            published(&actions),
            vec![Message::TestResult(TestResult { passed: false })]
        );
    }

    #[test]
    fn calibration_scenario() {
        let mut server = server();
        let actions = server.on_event(ServerEvent::Received(Message::Calibrate));
        assert_eq!(
            actions,
            vec![ServerAction::ReadSensor(SamplePurpose::Calibration)]
        );

        let actions = server.on_event(ServerEvent::Sampled {
            purpose: SamplePurpose::Calibration,
            value: 3400,
        });
        assert_eq!(published(&actions), vec![Message::CalibrateOk]);
        assert_eq!(server.threshold(), 3450);

        server.on_event(start(5, 1000));
        tick(&mut server, 3440);
        assert!(server.engine().is_running());
        tick(&mut server, 3460);
        assert!(!server.engine().is_running());
        assert!(!server.log().latest().passed);
    }

    #[test]
    fn failed_calibration_keeps_threshold_and_stays_silent() {
        let mut server = server();
        server.on_event(ServerEvent::Received(Message::Calibrate));
        let actions = server.on_event(ServerEvent::SampleFailed {
            purpose: SamplePurpose::Calibration,
            error: "no reading".into(),
        });

        assert!(published(&actions).is_empty());
        assert_eq!(server.threshold(), 3500);
    }

    #[test]
    fn get_log_replays_three_entries() {
        let mut log = ResultLog::new();
        for ts in [100, 200, 300] {
            log.append(ResultEntry::new(true, ts));
        }
        let mut server = TestServer::with_log(ServerSettings::default(), log);

        let mut sent = published(&server.on_event(ServerEvent::Received(Message::GetLog)));
        let mut ticks = 0;
        loop {
            ticks += 1;
            let actions = server.on_event(ServerEvent::TimerFired(ServerTimer::Replay));
            sent.extend(published(&actions));
            if actions.contains(&ServerAction::CancelTimer(ServerTimer::Replay)) {
                break;
            }
        }

        assert_eq!(ticks, 8);
        let timestamps: Vec<u32> = sent
            .iter()
            .map(|m| match m {
                Message::ResultLog(l) => l.timestamp,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(timestamps, vec![300, 200, 100]);
    }

    #[test]
    fn client_side_messages_are_ignored() {
        let mut server = server();
        let actions = server.on_event(ServerEvent::Received(Message::TestAck));
        assert_eq!(
            actions,
            vec![ServerAction::Report(ServerReport::Ignored(Opcode::TestAck))]
        );
    }
}
