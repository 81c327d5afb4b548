//! ServerRuntime - drives a [`TestServer`] on a real event loop.
//!
//! # Architecture
//!
//! The runtime owns the transport, the sensor, the indicator, the log store
//! and the timers. Inbound frames and timer fires are serialized onto one
//! task; each is fed to the pure state machine and the returned actions are
//! executed in order before the next event is taken.
//!
//! ```text
//! Transport ─┐
//!            ├─▶ TestServer::on_event ─▶ actions ─▶ Transport / Sensor / Indicator / LogStore / TimerWheel
//! TimerWheel ┘
//! ```

use std::collections::VecDeque;
use std::future::Future;

use lightmon_core::{
    ServerAction, ServerEvent, ServerReport, ServerSettings, ServerTimer, TestServer,
};
use lightmon_types::{Envelope, NodeAddress};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::error::NodeError;
use crate::sensor::{Indicator, Sensor};
use crate::store::LogStore;
use crate::timers::TimerWheel;
use crate::transport::Transport;

/// Event loop for one sensor node.
pub struct ServerRuntime<T, S, I> {
    transport: T,
    sensor: S,
    indicator: I,
    store: Option<LogStore>,
    publish: NodeAddress,
    settings: ServerSettings,
    server: TestServer,
    timers: TimerWheel<ServerTimer>,
    reports: Option<mpsc::UnboundedSender<ServerReport>>,
}

impl<T, S, I> ServerRuntime<T, S, I>
where
    T: Transport,
    S: Sensor,
    I: Indicator,
{
    /// Create a runtime with an empty log that publishes to all nodes.
    pub fn new(transport: T, sensor: S, indicator: I, settings: ServerSettings) -> Self {
        Self {
            transport,
            sensor,
            indicator,
            store: None,
            publish: NodeAddress::ALL_NODES,
            settings,
            server: TestServer::new(settings),
            timers: TimerWheel::new(),
            reports: None,
        }
    }

    /// Load the log from `store` and persist every finalized result there.
    pub async fn with_store(mut self, store: LogStore) -> Result<Self, NodeError> {
        let log = store.load().await?;
        info!(
            path = %store.path().display(),
            entries = log.written_count(),
            "result log ready"
        );
        self.server = TestServer::with_log(self.settings, log);
        self.store = Some(store);
        Ok(self)
    }

    /// Destination for every reply this node sends.
    pub fn publish_to(mut self, address: NodeAddress) -> Self {
        self.publish = address;
        self
    }

    /// Receive every report this node produces.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ServerReport> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.reports = Some(tx);
        rx
    }

    /// Node state.
    pub fn server(&self) -> &TestServer {
        &self.server
    }

    /// Run until `shutdown` resolves. Returns the final node state.
    pub async fn run<F>(mut self, shutdown: F) -> Result<TestServer, NodeError>
    where
        F: Future<Output = ()>,
    {
        let address = self.transport.local_address();
        info!(%address, publish = %self.publish, threshold = self.server.threshold(), "sensor node running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(%address, "sensor node stopping");
                    break;
                }
                received = self.transport.recv() => match received {
                    Ok(envelope) => {
                        if envelope.source == address || !envelope.is_for(address) {
                            trace!(from = %envelope.source, to = %envelope.destination, "not for us");
                            continue;
                        }
                        debug!(from = %envelope.source, message = ?envelope.message, "received");
                        self.handle(ServerEvent::Received(envelope.message)).await?;
                    }
                    Err(e) if e.is_recoverable() => warn!(error = %e, "dropping frame"),
                    Err(e) => return Err(e.into()),
                },
                timer = self.timers.next() => {
                    self.handle(ServerEvent::TimerFired(timer)).await?;
                }
            }
        }

        Ok(self.server)
    }

    async fn handle(&mut self, event: ServerEvent) -> Result<(), NodeError> {
        let mut queue: VecDeque<ServerAction> = self.server.on_event(event).into();

        while let Some(action) = queue.pop_front() {
            match action {
                ServerAction::Publish(message) => {
                    let envelope =
                        Envelope::new(self.transport.local_address(), self.publish, message);
                    debug!(to = %self.publish, ?message, "publishing");
                    if let Err(e) = self.transport.send(envelope).await {
                        if !e.is_recoverable() {
                            return Err(e.into());
                        }
                        warn!(error = %e, "publish failed");
                    }
                }
                ServerAction::ReadSensor(purpose) => {
                    let event = match self.sensor.read() {
                        Ok(value) => ServerEvent::Sampled { purpose, value },
                        Err(e) => ServerEvent::SampleFailed {
                            purpose,
                            error: e.to_string(),
                        },
                    };
                    // The reading's actions run before anything still queued
                    for follow_up in self.server.on_event(event).into_iter().rev() {
                        queue.push_front(follow_up);
                    }
                }
                ServerAction::SetIndicator(on) => self.indicator.set(on),
                ServerAction::PersistLog(log) => {
                    if let Some(store) = &self.store {
                        if let Err(e) = store.save(&log).await {
                            error!(error = %e, "failed to persist result log");
                        }
                    }
                }
                ServerAction::StartTimer { timer, schedule } => self.timers.start(timer, schedule),
                ServerAction::CancelTimer(timer) => self.timers.cancel(timer),
                ServerAction::Report(report) => self.report(report),
            }
        }
        Ok(())
    }

    fn report(&self, report: ServerReport) {
        match &report {
            ServerReport::TestStarted {
                duration,
                timestamp,
            } => info!(duration, timestamp, "test started"),
            ServerReport::Busy => warn!("test already running, TEST_START ignored"),
            ServerReport::Finalized { entry, index } => {
                info!(passed = entry.passed, timestamp = entry.timestamp, index, "test finalized")
            }
            ServerReport::AckUnavailable => warn!("GET_ACK while idle, requested TEST_START"),
            ServerReport::SensorFault { purpose, error } => {
                warn!(?purpose, %error, "sensor read failed")
            }
            ServerReport::Calibrated { sample, threshold } => {
                info!(sample, threshold, "threshold recalibrated")
            }
            ServerReport::EmptyLogSlot(index) => debug!(index, "empty log slot"),
            ServerReport::ReplayFinished => debug!("log replay finished"),
            ServerReport::Ignored(opcode) => debug!(?opcode, "message ignored"),
        }

        if let Some(tx) = &self.reports {
            let _ = tx.send(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{RecordingIndicator, ScriptedSensor};
    use crate::transport::{MemoryMesh, MeshEndpoint};
    use lightmon_core::{ResultEntry, ResultLog};
    use lightmon_types::{Message, StatusUpdate, TestResult, TestStart};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;
    use tokio::time::Instant;

    const COORDINATOR: NodeAddress = NodeAddress::new(1);
    const NODE: NodeAddress = NodeAddress::new(5);

    struct Harness {
        coordinator: MeshEndpoint,
        sensor: ScriptedSensor,
        indicator: RecordingIndicator,
        stop: oneshot::Sender<()>,
        task: JoinHandle<Result<TestServer, NodeError>>,
    }

    async fn spawn_node(store: Option<LogStore>) -> Harness {
        let mesh = MemoryMesh::new();
        let coordinator = mesh.join(COORDINATOR);
        let sensor = ScriptedSensor::new();
        sensor.set_fallback(100);
        let indicator = RecordingIndicator::new();

        let mut runtime = ServerRuntime::new(
            mesh.join(NODE),
            sensor.clone(),
            indicator.clone(),
            ServerSettings::default(),
        )
        .publish_to(COORDINATOR);
        if let Some(store) = store {
            runtime = runtime.with_store(store).await.unwrap();
        }

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(runtime.run(async {
            let _ = stopped.await;
        }));

        Harness {
            coordinator,
            sensor,
            indicator,
            stop,
            task,
        }
    }

    impl Harness {
        async fn send(&self, message: Message) {
            self.coordinator
                .send(Envelope::new(COORDINATOR, NODE, message))
                .await
                .unwrap();
        }

        async fn expect(&self) -> Message {
            let envelope = self.coordinator.recv().await.unwrap();
            assert_eq!(envelope.source, NODE);
            assert_eq!(envelope.destination, COORDINATOR);
            envelope.message
        }

        async fn stop(self) -> TestServer {
            let _ = self.stop.send(());
            self.task.await.unwrap().unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn campaign_runs_to_completion_and_persists() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::in_dir(dir.path());
        let node = spawn_node(Some(store.clone())).await;
        let started = Instant::now();

        node.send(Message::TestStart(TestStart {
            duration: 3,
            timestamp: 1000,
        }))
        .await;
        assert_eq!(node.expect().await, Message::TestAck);
        assert!(node.indicator.is_on());

        assert_eq!(
            node.expect().await,
            Message::TestResult(TestResult { passed: true })
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));
        assert_eq!(node.indicator.changes(), vec![true, false]);

        let saved = store.load().await.unwrap();
        assert_eq!(saved.latest(), ResultEntry::new(true, 1000));

        let server = node.stop().await;
        assert!(!server.engine().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn bright_sample_fails_early() {
        let node = spawn_node(None).await;
        node.sensor.push(100);
        node.sensor.push(4000);

        node.send(Message::TestStart(TestStart {
            duration: 60,
            timestamp: 1000,
        }))
        .await;
        assert_eq!(node.expect().await, Message::TestAck);
        let started = Instant::now();

        assert_eq!(
            node.expect().await,
            Message::TestResult(TestResult { passed: false })
        );
        assert!(started.elapsed() < Duration::from_secs(3));
        node.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frame_is_dropped_without_reply() {
        let node = spawn_node(None).await;
        // UPDATE_STATUS with a one-byte payload
        node.coordinator
            .mesh()
            .inject(NODE, vec![1, 0, 5, 0, 0x04, 0x01]);

        node.send(Message::GetStatus).await;
        assert_eq!(
            node.expect().await,
            Message::UpdateStatus(StatusUpdate { value: 0 })
        );
        node.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn saved_log_answers_get_result() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::in_dir(dir.path());
        let mut log = ResultLog::new();
        log.append(ResultEntry::new(false, 500));
        store.save(&log).await.unwrap();

        let node = spawn_node(Some(store)).await;
        node.send(Message::GetResult).await;
        assert_eq!(
            node.expect().await,
            Message::TestResult(TestResult { passed: false })
        );
        node.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn get_log_replays_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = LogStore::in_dir(dir.path());
        let mut log = ResultLog::new();
        for ts in [100, 200, 300] {
            log.append(ResultEntry::new(true, ts));
        }
        store.save(&log).await.unwrap();

        let node = spawn_node(Some(store)).await;
        node.send(Message::GetLog).await;

        let mut timestamps = Vec::new();
        for _ in 0..3 {
            match node.expect().await {
                Message::ResultLog(entry) => timestamps.push(entry.timestamp),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(timestamps, vec![300, 200, 100]);

        // Nothing more once the replay has come full circle
        let extra = tokio::time::timeout(Duration::from_secs(1), node.expect()).await;
        assert!(extra.is_err());
        node.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sensor_fault_skips_the_tick() {
        let node = spawn_node(None).await;
        node.sensor.push_failure("adc busy");

        node.send(Message::TestStart(TestStart {
            duration: 2,
            timestamp: 1000,
        }))
        .await;
        assert_eq!(node.expect().await, Message::TestAck);
        let started = Instant::now();

        assert_eq!(
            node.expect().await,
            Message::TestResult(TestResult { passed: true })
        );
        // Failed first tick, then two good ones
        assert!(started.elapsed() >= Duration::from_secs(3));
        node.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn calibrate_replies_ok() {
        let node = spawn_node(None).await;
        node.sensor.push(3400);

        node.send(Message::Calibrate).await;
        assert_eq!(node.expect().await, Message::CalibrateOk);

        let server = node.stop().await;
        assert_eq!(server.threshold(), 3450);
        assert_eq!(server.last_sample(), 3400);
    }
}
