//! Simulate command implementation.
//!
//! Runs a device store against an in-process [`RemoteServer`], optionally
//! starting offline and losing dispatch acknowledgements, and reports every
//! sync round.

use super::inspect::OutboxCounts;
use super::Format;
use crate::error::CliResult;
use fieldsync_engine::{
    MemoryStore, OutboxLog, RecordStore, RetryConfig, SyncConfig, SyncOrchestrator, SyncReport,
};
use fieldsync_protocol::{encode, OperationKind, OutboxStatus, Syncable, SyncableRecord};
use fieldsync_server::{RemoteServer, ServerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Pause between rounds; longer than the largest backoff delay.
const ROUND_PAUSE: Duration = Duration::from_millis(250);

/// Simulation settings.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Local tasks written before the first round.
    pub local_records: usize,
    /// Tasks already on the server.
    pub remote_records: usize,
    /// Payment operations enqueued in the outbox.
    pub operations: usize,
    /// Server unreachable during the first round.
    pub start_offline: bool,
    /// Dispatches applied whose acknowledgement is lost.
    pub lost_acks: u32,
    /// Maximum rounds before giving up.
    pub max_rounds: u32,
    /// Per-request latency.
    pub latency: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Task {
    id: String,
    title: String,
    done: bool,
}

impl Syncable for Task {
    const ENTITY_TYPE: &'static str = "task";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Serialize)]
struct Payment {
    amount_cents: u64,
}

/// One sync round.
#[derive(Debug, Serialize)]
pub struct RoundSummary {
    /// Round number, starting at 1.
    pub round: u32,
    /// Whether the server was unreachable.
    pub offline: bool,
    /// Sync and drain result.
    pub report: SyncReport,
}

/// Simulation result.
#[derive(Debug, Serialize)]
pub struct SimulationResult {
    /// Every round that ran.
    pub rounds: Vec<RoundSummary>,
    /// True if the device ended with nothing left to push or deliver.
    pub converged: bool,
    /// Tasks on the server.
    pub server_records: usize,
    /// Distinct outbox effects the server applied.
    pub server_effects: usize,
    /// Dispatches the server recognised as repeats.
    pub duplicate_dispatches: u64,
    /// Local tasks the server rejected.
    pub rejected_records: usize,
    /// Local outbox state after the last round.
    pub outbox: OutboxCounts,
}

/// Runs the simulate command.
pub fn run(path: Option<&Path>, options: SimulateOptions, format: Format) -> CliResult<()> {
    let store = match path {
        Some(path) if path.exists() => MemoryStore::load_snapshot(path)?,
        _ => MemoryStore::new(),
    };
    let store = Arc::new(store);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(simulate(Arc::clone(&store), options))?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }

    if let Some(path) = path {
        store.save_snapshot(path)?;
        println!("Saved device store to {}", path.display());
    }
    Ok(())
}

/// Seeds the store and server, then syncs until the device has converged or
/// the round budget runs out.
pub async fn simulate(
    store: Arc<MemoryStore>,
    options: SimulateOptions,
) -> CliResult<SimulationResult> {
    let mut server_config = ServerConfig::default();
    if !options.latency.is_zero() {
        server_config = server_config.with_latency(options.latency);
    }
    let server = Arc::new(RemoteServer::new(server_config).with_validator(validate_task));

    let retry = RetryConfig::new(5)
        .with_initial_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_millis(200));
    let orchestrator = SyncOrchestrator::new(
        SyncConfig::default().with_retry(retry),
        Arc::clone(&store),
        Arc::clone(&server),
    );
    orchestrator.register_syncable::<Task>();
    let task_type = Task::entity_type();

    for i in 0..options.remote_records {
        let task = Task {
            id: format!("remote-{i}"),
            title: format!("Remote task {i}"),
            done: i % 2 == 0,
        };
        server.put_remote(&task_type, &task.id, encode(&task)?, false);
    }

    let tasks = orchestrator.records::<Task>();
    for i in 0..options.local_records {
        // Every seventh task has no title and is rejected by the server.
        let title = if i % 7 == 6 {
            String::new()
        } else {
            format!("Local task {i}")
        };
        tasks.save(&Task {
            id: format!("local-{i}"),
            title,
            done: false,
        })?;
    }

    for i in 0..options.operations {
        let payment = Payment {
            amount_cents: 100 * (i as u64 + 1),
        };
        orchestrator.enqueue_outbox(
            "payment",
            OperationKind::RemoteWrite,
            encode(&payment)?,
            "simulator",
        )?;
    }

    server.faults().set_offline(options.start_offline);
    if options.lost_acks > 0 {
        server.faults().drop_dispatch_acks(options.lost_acks);
    }

    let mut rounds = Vec::new();
    let mut converged = false;
    for round in 1..=options.max_rounds {
        let offline = server.faults().is_offline();
        let report = orchestrator.run_sync_and_drain(None).await?;
        info!(
            round,
            offline,
            pushed = report.pushed(),
            pulled = report.pulled(),
            retries = report.retries_scheduled(),
            "sync round finished"
        );
        rounds.push(RoundSummary {
            round,
            offline,
            report,
        });
        server.faults().set_offline(false);

        let nothing_to_push = store.list_dirty(&task_type, 1)?.is_empty();
        let open_entries = store
            .list_outbox_entries(None)?
            .iter()
            .filter(|e| !e.status.is_terminal())
            .count();
        if nothing_to_push && open_entries == 0 {
            converged = true;
            break;
        }
        tokio::time::sleep(ROUND_PAUSE).await;
    }

    let mut outbox = OutboxCounts::default();
    for entry in store.list_outbox_entries(None)? {
        match entry.status {
            OutboxStatus::Pending => outbox.pending += 1,
            OutboxStatus::InFlight => outbox.in_flight += 1,
            OutboxStatus::Completed => outbox.completed += 1,
            OutboxStatus::Failed => outbox.failed += 1,
        }
    }

    Ok(SimulationResult {
        rounds,
        converged,
        server_records: server.records(&task_type).len(),
        server_effects: server.effect_count(),
        duplicate_dispatches: server.stats().duplicate_dispatches,
        rejected_records: orchestrator.rejected_records(&task_type)?.len(),
        outbox,
    })
}

fn validate_task(record: &SyncableRecord) -> Result<(), String> {
    if record.is_deleted {
        return Ok(());
    }
    let task: Task = record.decode().map_err(|e| e.to_string())?;
    if task.title.trim().is_empty() {
        return Err("title must not be empty".into());
    }
    Ok(())
}

fn print_text_output(result: &SimulationResult) {
    println!("FieldSync Simulation");
    println!("====================");
    println!();

    for round in &result.rounds {
        let report = &round.report;
        println!(
            "Round {}{}:",
            round.round,
            if round.offline { " (offline)" } else { "" }
        );
        for entity in &report.entities {
            println!(
                "  {:<10} {:?}  pushed={} rejected={} deferred={} pulled={} kept_local={}",
                entity.entity_type.as_str(),
                entity.outcome,
                entity.push.pushed,
                entity.push.rejected,
                entity.push.deferred,
                entity.pull.merge.applied,
                entity.pull.merge.kept_dirty,
            );
        }
        if let Some(outbox) = &report.outbox {
            println!(
                "  outbox     delivered={} duplicates={} requeued={} failed={}",
                outbox.delivered,
                outbox.duplicates,
                outbox.requeued,
                outbox.failed_permanently + outbox.exhausted,
            );
        }
    }

    println!();
    println!("Converged:            {}", result.converged);
    println!("Server records:       {}", result.server_records);
    println!("Server effects:       {}", result.server_effects);
    println!("Duplicate dispatches: {}", result.duplicate_dispatches);
    println!("Rejected records:     {}", result.rejected_records);
    println!(
        "Outbox:               {} completed, {} failed, {} open",
        result.outbox.completed,
        result.outbox.failed,
        result.outbox.pending + result.outbox.in_flight
    );
}
