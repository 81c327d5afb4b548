//! CoordinatorRuntime - drives an [`Orchestrator`] on a real event loop.
//!
//! Operator requests arrive through a [`CoordinatorHandle`]; frames from the
//! mesh and timer fires arrive on the same task. Reports go out on an
//! optional channel so a console can print them as they happen.
//!
//! The runtime also keeps the [`HistoryBook`] fed from RESULT_LOG replies,
//! leaving the orchestrator itself untouched by log replays.

use lightmon_core::{
    CampaignReport, Command, CoordinatorAction, CoordinatorEvent, CoordinatorReport,
    CoordinatorTimer, HistoryBook, Orchestrator,
};
use lightmon_types::{Envelope, Message, NodeAddress};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::error::NodeError;
use crate::timers::TimerWheel;
use crate::transport::Transport;

/// Depth of the request queue between handles and the runtime.
const REQUEST_QUEUE: usize = 32;

#[derive(Debug)]
enum Request {
    Command(Command),
    Roster(oneshot::Sender<Vec<NodeAddress>>),
    History(oneshot::Sender<HistoryBook>),
    LastReport(oneshot::Sender<Option<CampaignReport>>),
    Running(oneshot::Sender<bool>),
}

/// Cloneable handle for talking to a running coordinator.
///
/// The runtime stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Request>,
}

impl CoordinatorHandle {
    /// Submit an operator command.
    pub async fn command(&self, command: Command) -> Result<(), NodeError> {
        self.tx
            .send(Request::Command(command))
            .await
            .map_err(|_| NodeError::Stopped)
    }

    /// Current roster.
    pub async fn roster(&self) -> Result<Vec<NodeAddress>, NodeError> {
        self.ask(Request::Roster).await
    }

    /// Collected log history.
    pub async fn history(&self) -> Result<HistoryBook, NodeError> {
        self.ask(Request::History).await
    }

    /// Report of the most recently finished campaign.
    pub async fn last_report(&self) -> Result<Option<CampaignReport>, NodeError> {
        self.ask(Request::LastReport).await
    }

    /// True while a campaign is running.
    pub async fn is_running(&self) -> Result<bool, NodeError> {
        self.ask(Request::Running).await
    }

    async fn ask<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Request) -> Result<R, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .await
            .map_err(|_| NodeError::Stopped)?;
        rx.await.map_err(|_| NodeError::Stopped)
    }
}

/// Event loop for the coordinator.
pub struct CoordinatorRuntime<T> {
    transport: T,
    orchestrator: Orchestrator,
    history: HistoryBook,
    timers: TimerWheel<CoordinatorTimer>,
    requests: mpsc::Receiver<Request>,
    reports: Option<mpsc::UnboundedSender<CoordinatorReport>>,
}

impl<T: Transport> CoordinatorRuntime<T> {
    /// Create a runtime and its first handle.
    pub fn new(transport: T, orchestrator: Orchestrator) -> (Self, CoordinatorHandle) {
        let (tx, requests) = mpsc::channel(REQUEST_QUEUE);
        let runtime = Self {
            transport,
            orchestrator,
            history: HistoryBook::new(),
            timers: TimerWheel::new(),
            requests,
            reports: None,
        };
        (runtime, CoordinatorHandle { tx })
    }

    /// Receive every report the coordinator produces.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<CoordinatorReport> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.reports = Some(tx);
        rx
    }

    /// Run until every handle is dropped. Returns the final state.
    pub async fn run(mut self) -> Result<(Orchestrator, HistoryBook), NodeError> {
        let address = self.transport.local_address();
        info!(%address, roster = self.orchestrator.roster().len(), "coordinator running");

        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.on_request(request).await?,
                    None => {
                        info!("all handles dropped, coordinator stopping");
                        break;
                    }
                },
                received = self.transport.recv() => match received {
                    Ok(envelope) => {
                        if envelope.source == address || !envelope.is_for(address) {
                            trace!(from = %envelope.source, to = %envelope.destination, "not for us");
                            continue;
                        }
                        debug!(from = %envelope.source, message = ?envelope.message, "received");
                        self.handle(CoordinatorEvent::Received {
                            from: envelope.source,
                            message: envelope.message,
                        })
                        .await?;
                    }
                    Err(e) if e.is_recoverable() => warn!(error = %e, "dropping frame"),
                    Err(e) => return Err(e.into()),
                },
                timer = self.timers.next() => {
                    self.handle(CoordinatorEvent::TimerFired(timer)).await?;
                }
            }
        }

        Ok((self.orchestrator, self.history))
    }

    async fn on_request(&mut self, request: Request) -> Result<(), NodeError> {
        // A dropped reply receiver only means the asker gave up
        match request {
            Request::Command(command) => self.handle(CoordinatorEvent::Command(command)).await?,
            Request::Roster(reply) => {
                let _ = reply.send(self.orchestrator.roster().iter().collect());
            }
            Request::History(reply) => {
                let _ = reply.send(self.history.clone());
            }
            Request::LastReport(reply) => {
                let _ = reply.send(self.orchestrator.last_report().cloned());
            }
            Request::Running(reply) => {
                let _ = reply.send(self.orchestrator.is_running());
            }
        }
        Ok(())
    }

    async fn handle(&mut self, event: CoordinatorEvent) -> Result<(), NodeError> {
        for action in self.orchestrator.on_event(event) {
            match action {
                CoordinatorAction::Broadcast(message) => {
                    self.send(NodeAddress::ALL_NODES, message).await?
                }
                CoordinatorAction::Send { to, message } => self.send(to, message).await?,
                CoordinatorAction::StartTimer { timer, schedule } => {
                    self.timers.start(timer, schedule)
                }
                CoordinatorAction::CancelTimer(timer) => self.timers.cancel(timer),
                CoordinatorAction::Report(report) => self.report(report),
            }
        }
        Ok(())
    }

    async fn send(&self, to: NodeAddress, message: Message) -> Result<(), NodeError> {
        let envelope = Envelope::new(self.transport.local_address(), to, message);
        debug!(%to, ?message, "sending");
        match self.transport.send(envelope).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_recoverable() => {
                warn!(%to, error = %e, "send failed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn report(&mut self, report: CoordinatorReport) {
        match &report {
            CoordinatorReport::CampaignStarted {
                duration,
                timestamp,
            } => info!(duration, timestamp, "campaign started"),
            CoordinatorReport::AlreadyRunning => warn!("campaign already running"),
            CoordinatorReport::Polled { node, request } => {
                debug!(%node, ?request, "polled")
            }
            CoordinatorReport::EmptySlot { index } => warn!(index, "empty roster slot"),
            CoordinatorReport::EmptyRoster => warn!("roster is empty"),
            CoordinatorReport::AckPhaseEnded { acked, interrupted } => {
                info!(acked, interrupted, "ack polling finished")
            }
            CoordinatorReport::ResultPhaseStarted => info!("result polling started"),
            CoordinatorReport::CampaignFinished(campaign) => info!(
                timestamp = campaign.timestamp,
                passed = campaign.passed(),
                failed = campaign.failed(),
                "campaign finished"
            ),
            CoordinatorReport::Acked { node } => debug!(%node, "acked"),
            CoordinatorReport::TestResult { node, passed } => info!(%node, passed, "result"),
            CoordinatorReport::LogEntry {
                node,
                passed,
                timestamp,
            } => {
                if self.history.record(*node, *timestamp, *passed) {
                    debug!(%node, timestamp, passed, "logged result");
                } else {
                    trace!(%node, timestamp, "duplicate logged result");
                }
            }
            CoordinatorReport::Status { node, value } => info!(%node, value, "status"),
            CoordinatorReport::Calibrated { node } => info!(%node, "calibrated"),
            CoordinatorReport::Restarted { node } => info!(%node, "resent TEST_START"),
            CoordinatorReport::NoCampaign { node } => {
                warn!(%node, "GET_START with no campaign running")
            }
            CoordinatorReport::RosterFull { capacity } => warn!(capacity, "roster full"),
            CoordinatorReport::RosterChanged { len } => debug!(len, "roster changed"),
            CoordinatorReport::Unexpected { node, opcode } => {
                debug!(%node, ?opcode, "unexpected message")
            }
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
    use crate::server::ServerRuntime;
    use crate::transport::MemoryMesh;
    use lightmon_core::{NodeRoster, OrchestratorSettings, ServerSettings, TestServer};
    use lightmon_types::{LoggedResult, Message};
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio::time::Instant;

    const COORDINATOR: NodeAddress = NodeAddress::new(1);

    fn addr(a: u16) -> NodeAddress {
        NodeAddress::new(a)
    }

    fn coordinator(
        mesh: &MemoryMesh,
        nodes: &[u16],
    ) -> (
        CoordinatorHandle,
        mpsc::UnboundedReceiver<CoordinatorReport>,
        JoinHandle<Result<(Orchestrator, HistoryBook), NodeError>>,
    ) {
        let mut roster = NodeRoster::new();
        for n in nodes {
            roster.push(addr(*n)).unwrap();
        }
        let orchestrator = Orchestrator::with_roster(OrchestratorSettings::default(), roster);
        let (mut runtime, handle) = CoordinatorRuntime::new(mesh.join(COORDINATOR), orchestrator);
        let reports = runtime.subscribe();
        (handle, reports, tokio::spawn(runtime.run()))
    }

    fn sensor_node(
        mesh: &MemoryMesh,
        address: u16,
        reading: u16,
    ) -> JoinHandle<Result<TestServer, NodeError>> {
        let sensor = ScriptedSensor::new();
        sensor.set_fallback(reading);
        let runtime = ServerRuntime::new(
            mesh.join(addr(address)),
            sensor,
            RecordingIndicator::new(),
            ServerSettings::default(),
        )
        .publish_to(COORDINATOR);
        // Nodes run until the test ends
        tokio::spawn(runtime.run(std::future::pending()))
    }

    async fn wait_for_finish(
        reports: &mut mpsc::UnboundedReceiver<CoordinatorReport>,
    ) -> CampaignReport {
        while let Some(report) = reports.recv().await {
            if let CoordinatorReport::CampaignFinished(campaign) = report {
                return campaign;
            }
        }
        panic!("report channel closed before the campaign finished");
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_campaign_with_two_nodes() {
        let mesh = MemoryMesh::new();
        sensor_node(&mesh, 5, 100);
        sensor_node(&mesh, 7, 100);
        let (handle, mut reports, task) = coordinator(&mesh, &[5, 7]);
        let started = Instant::now();

        handle
            .command(Command::StartCampaign {
                duration: 60,
                timestamp: 1000,
            })
            .await
            .unwrap();
        let campaign = wait_for_finish(&mut reports).await;

        // Result polling starts at 65 s and takes one tick per node
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(65) && elapsed < Duration::from_secs(68));
        assert_eq!(campaign.acked, vec![addr(5), addr(7)]);
        assert_eq!(campaign.outcomes.get(&addr(5)), Some(&true));
        assert_eq!(campaign.outcomes.get(&addr(7)), Some(&true));
        assert!(!handle.is_running().await.unwrap());

        // Nodes reply straight away, so nobody needed polling
        let polls: Vec<_> = mesh
            .sent_by(COORDINATOR)
            .into_iter()
            .filter(|e| matches!(e.message, Message::GetAck | Message::GetResult))
            .collect();
        assert!(polls.is_empty());

        drop(handle);
        let (orchestrator, _) = task.await.unwrap().unwrap();
        assert!(orchestrator.resulted().is_empty());
        assert_eq!(orchestrator.last_report(), Some(&campaign));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_node_is_reported() {
        let mesh = MemoryMesh::new();
        sensor_node(&mesh, 5, 100);
        sensor_node(&mesh, 7, 4000);
        let (handle, mut reports, _task) = coordinator(&mesh, &[5, 7]);

        handle
            .command(Command::StartCampaign {
                duration: 10,
                timestamp: 2000,
            })
            .await
            .unwrap();
        let campaign = wait_for_finish(&mut reports).await;

        assert_eq!(campaign.outcomes.get(&addr(5)), Some(&true));
        assert_eq!(campaign.outcomes.get(&addr(7)), Some(&false));
        assert_eq!(campaign.failed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_node_catches_up_through_polling() {
        let mesh = MemoryMesh::new();
        sensor_node(&mesh, 5, 100);
        sensor_node(&mesh, 7, 100);
        let (handle, mut reports, _task) = coordinator(&mesh, &[5, 7]);

        // Node 7 misses the broadcast; the GET_ACK poll makes it ask for a restart
        mesh.isolate(addr(7));
        handle
            .command(Command::StartCampaign {
                duration: 5,
                timestamp: 3000,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        mesh.reconnect(addr(7));

        let campaign = wait_for_finish(&mut reports).await;
        assert_eq!(campaign.outcomes.get(&addr(7)), Some(&true));

        let sent = mesh.sent_by(COORDINATOR);
        assert!(sent
            .iter()
            .any(|e| e.destination == addr(7) && e.message == Message::GetAck));
        assert!(sent
            .iter()
            .any(|e| e.destination == addr(7) && matches!(e.message, Message::TestStart(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn sentinel_slot_is_never_polled() {
        let mesh = MemoryMesh::new();
        let (handle, mut reports, _task) = coordinator(&mesh, &[0, 9]);

        handle
            .command(Command::StartCampaign {
                duration: 1,
                timestamp: 4000,
            })
            .await
            .unwrap();
        wait_for_finish(&mut reports).await;

        let sent = mesh.sent_by(COORDINATOR);
        assert!(sent.iter().all(|e| e.destination != NodeAddress::UNASSIGNED));
        assert!(sent
            .iter()
            .any(|e| e.destination == addr(9) && e.message == Message::GetResult));
    }

    #[tokio::test(start_paused = true)]
    async fn log_replay_fills_history_once() {
        let mesh = MemoryMesh::new();
        let node = mesh.join(addr(5));
        let (handle, _reports, _task) = coordinator(&mesh, &[5]);

        handle.command(Command::Log(addr(5))).await.unwrap();
        let request = node.recv().await.unwrap();
        assert_eq!(request.message, Message::GetLog);

        for (passed, timestamp) in [(true, 1000), (false, 1000), (false, 2000)] {
            node.send(Envelope::new(
                addr(5),
                COORDINATOR,
                Message::ResultLog(LoggedResult { passed, timestamp }),
            ))
            .await
            .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let history = handle.history().await.unwrap();
        assert_eq!(
            history.node(addr(5)).collect::<Vec<_>>(),
            vec![(1000, true), (2000, false)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn roster_commands_round_trip_through_handle() {
        let mesh = MemoryMesh::new();
        let (handle, _reports, task) = coordinator(&mesh, &[]);

        handle.command(Command::AddNode(addr(5))).await.unwrap();
        handle.command(Command::AddNode(addr(7))).await.unwrap();
        assert_eq!(handle.roster().await.unwrap(), vec![addr(5), addr(7)]);

        handle.command(Command::ResetNodes).await.unwrap();
        assert!(handle.roster().await.unwrap().is_empty());

        drop(handle);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected_while_running() {
        let mesh = MemoryMesh::new();
        let (handle, mut reports, _task) = coordinator(&mesh, &[5]);

        let start = Command::StartCampaign {
            duration: 30,
            timestamp: 1000,
        };
        handle.command(start).await.unwrap();
        handle.command(start).await.unwrap();

        let mut rejected = false;
        while let Some(report) = reports.recv().await {
            if report == CoordinatorReport::AlreadyRunning {
                rejected = true;
                break;
            }
        }
        assert!(rejected);
    }
}
