//! Coordinator command - run campaigns from an interactive console.
//!
//! Each stdin line is one console command (`start 60`, `log 5`, `nodes`, ...).
//! Reports from the mesh are printed as they arrive, either as text or as
//! JSON lines with `--json`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lightmon_core::{CampaignReport, Command, CoordinatorReport, HistoryBook, Orchestrator};
use lightmon_node::{CoordinatorHandle, CoordinatorRuntime, UdpTransport};
use lightmon_types::NodeAddress;
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::Config;

/// One console line.
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_version_flag = true)]
struct ConsoleLine {
    #[command(subcommand)]
    command: ConsoleCommand,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum ConsoleCommand {
    /// Start a campaign on every roster node
    Start {
        /// Test length in seconds (default: from config)
        duration: Option<u16>,
        /// Campaign timestamp (default: now)
        timestamp: Option<u32>,
    },
    /// Ask every node for its latest sample
    Status,
    /// Ask a node to replay its result log
    Log { node: u16 },
    /// Ask a node whether it is running a test
    Ack { node: u16 },
    /// Ask a node for its latest result
    Result { node: u16 },
    /// Recalibrate a node against the current light level
    Calibrate { node: u16 },
    /// Append a node to the roster
    AddNode { node: u16 },
    /// Clear the roster
    ResetNodes,
    /// Show the roster
    Nodes,
    /// Show collected log entries
    History,
    /// Show the last finished campaign
    Report,
    /// Stop the coordinator
    #[command(alias = "exit")]
    Quit,
}

/// Run the coordinator command.
pub async fn run(config: &Config, json: bool) -> Result<()> {
    let address = config.address();
    let transport = UdpTransport::bind(address, config.node.bind, config.peers()?)
        .await
        .context("Failed to bind UDP socket")?;
    let local = transport.local_socket()?;

    let orchestrator = Orchestrator::with_roster(config.orchestrator_settings(), config.roster()?);
    let (mut runtime, handle) = CoordinatorRuntime::new(transport, orchestrator);
    let mut reports = runtime.subscribe();

    let runtime = tokio::spawn(runtime.run());
    let printer = tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            if json {
                match serde_json::to_string(&report) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "failed to encode report"),
                }
            } else {
                println!("{}", describe(&report));
            }
        }
    });

    if !json {
        println!("Coordinator ready!");
        println!();
        println!("  Address:   {}", address);
        println!("  Listening: {}", local);
        println!();
        println!("Type `help` for commands.");
    }

    console(handle, config, json).await?;

    let (orchestrator, history) = runtime.await.context("Coordinator task failed")??;
    printer.await.context("Report printer failed")?;

    if !json {
        println!(
            "Stopped. {} node(s) in roster, {} log entr(ies) collected.",
            orchestrator.roster().len(),
            history.len()
        );
    }

    Ok(())
}

/// Read console lines until `quit` or end of input.
async fn console(handle: CoordinatorHandle, config: &Config, json: bool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_line(&line) {
            Ok(command) => command,
            Err(e) => {
                // Covers `help` too
                println!("{e}");
                continue;
            }
        };

        if command == ConsoleCommand::Quit {
            break;
        }
        execute(&handle, command, config, json).await?;
    }

    Ok(())
}

fn parse_line(line: &str) -> Result<ConsoleCommand, clap::Error> {
    ConsoleLine::try_parse_from(line.split_whitespace()).map(|line| line.command)
}

async fn execute(
    handle: &CoordinatorHandle,
    command: ConsoleCommand,
    config: &Config,
    json: bool,
) -> Result<()> {
    match command {
        ConsoleCommand::Start {
            duration,
            timestamp,
        } => {
            handle
                .command(Command::StartCampaign {
                    duration: duration.unwrap_or(config.test.duration_secs),
                    timestamp: timestamp.unwrap_or_else(now),
                })
                .await?;
        }
        ConsoleCommand::Status => handle.command(Command::Status).await?,
        ConsoleCommand::Log { node } => handle.command(Command::Log(node.into())).await?,
        ConsoleCommand::Ack { node } => handle.command(Command::Ack(node.into())).await?,
        ConsoleCommand::Result { node } => handle.command(Command::Result(node.into())).await?,
        ConsoleCommand::Calibrate { node } => {
            handle.command(Command::Calibrate(node.into())).await?
        }
        ConsoleCommand::AddNode { node } => handle.command(Command::AddNode(node.into())).await?,
        ConsoleCommand::ResetNodes => handle.command(Command::ResetNodes).await?,
        ConsoleCommand::Nodes => {
            let roster = handle.roster().await?;
            let running = handle.is_running().await?;
            if json {
                println!("{}", json!({ "roster": roster, "running": running }));
            } else {
                println!("{}", describe_roster(&roster, running));
            }
        }
        ConsoleCommand::History => {
            let history = handle.history().await?;
            if json {
                println!("{}", serde_json::to_string(&history)?);
            } else {
                print!("{}", describe_history(&history));
            }
        }
        ConsoleCommand::Report => {
            let report = handle.last_report().await?;
            if json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                match report {
                    Some(report) => println!("{}", describe_campaign(&report)),
                    None => println!("No campaign finished yet."),
                }
            }
        }
        ConsoleCommand::Quit => {}
    }
    Ok(())
}

/// Current time as campaign timestamp.
fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u32::try_from(elapsed.as_secs()).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

fn verdict(passed: bool) -> &'static str {
    if passed {
        "PASS"
    } else {
        "FAIL"
    }
}

fn describe_roster(roster: &[NodeAddress], running: bool) -> String {
    let state = if running { " (campaign running)" } else { "" };
    if roster.is_empty() {
        return format!("Roster is empty{state}");
    }
    let nodes: Vec<String> = roster.iter().map(ToString::to_string).collect();
    format!("Roster ({}){state}: {}", roster.len(), nodes.join(", "))
}

fn describe_history(history: &HistoryBook) -> String {
    if history.is_empty() {
        return "No log entries collected.\n".to_string();
    }
    let mut out = String::new();
    for node in history.nodes() {
        out.push_str(&format!("{node}:\n"));
        for (timestamp, passed) in history.node(node) {
            out.push_str(&format!("  {timestamp:>10}  {}\n", verdict(passed)));
        }
    }
    out
}

fn describe_campaign(report: &CampaignReport) -> String {
    let mut out = format!(
        "Campaign {} ({}s): {} acked, {} passed, {} failed",
        report.timestamp,
        report.duration,
        report.acked.len(),
        report.passed(),
        report.failed()
    );
    for (node, passed) in &report.outcomes {
        out.push_str(&format!("\n  {node}  {}", verdict(*passed)));
    }
    out
}

/// One line of human output per report.
fn describe(report: &CoordinatorReport) -> String {
    match report {
        CoordinatorReport::CampaignStarted {
            duration,
            timestamp,
        } => format!("Campaign {timestamp} started ({duration}s)"),
        CoordinatorReport::AlreadyRunning => "A campaign is already running".to_string(),
        CoordinatorReport::Polled { node, request } => format!("Polling {node} with {request:?}"),
        CoordinatorReport::EmptySlot { index } => format!("Roster slot {index} is empty"),
        CoordinatorReport::EmptyRoster => "Roster is empty, nothing to poll".to_string(),
        CoordinatorReport::AckPhaseEnded { acked, interrupted } => {
            if *interrupted {
                format!("Ack sweep cut short by result polling ({acked} acked)")
            } else {
                format!("Ack sweep finished ({acked} acked)")
            }
        }
        CoordinatorReport::ResultPhaseStarted => "Collecting results".to_string(),
        CoordinatorReport::CampaignFinished(campaign) => describe_campaign(campaign),
        CoordinatorReport::Acked { node } => format!("{node} acknowledged"),
        CoordinatorReport::TestResult { node, passed } => {
            format!("{node} result: {}", verdict(*passed))
        }
        CoordinatorReport::LogEntry {
            node,
            passed,
            timestamp,
        } => format!("{node} log: {timestamp} {}", verdict(*passed)),
        CoordinatorReport::Status { node, value } => format!("{node} status: {value}"),
        CoordinatorReport::Calibrated { node } => format!("{node} calibrated"),
        CoordinatorReport::Restarted { node } => format!("Resent campaign start to {node}"),
        CoordinatorReport::NoCampaign { node } => {
            format!("{node} asked for a campaign but none is running")
        }
        CoordinatorReport::RosterFull { capacity } => {
            format!("Roster full (capacity: {capacity})")
        }
        CoordinatorReport::RosterChanged { len } => format!("Roster now has {len} node(s)"),
        CoordinatorReport::Unexpected { node, opcode } => {
            format!("Ignored {opcode:?} from {node}")
        }
    }
}
