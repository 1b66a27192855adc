//! Simulate command implementation.
//!
//! Drives a page workload through the whole pipeline: the store's commit
//! hook enqueues operations, queue workers apply them to an in-memory
//! index, and the index is compared with the store at the end.

use indexsync_core::{DispatcherStats, EntityId, EntityStore, IndexManager};
use indexsync_queue::{DeadLetterLog, IndexQueue, QueueConfig, QueueStats, RetryConfig};
use indexsync_testkit::fixtures::{page, page_type, FailurePlan, FlakyManager, TestPipeline};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pages per section. The first page of a section is the parent of the rest.
const SECTION_SIZE: u64 = 10;

/// Simulation parameters.
#[derive(Debug, Clone, Copy)]
pub struct SimulationConfig {
    /// Number of pages to create.
    pub entities: u64,
    /// Number of queue workers.
    pub workers: usize,
    /// Fail every K-th index call, if set.
    pub fail_every: Option<usize>,
}

/// Result of a simulation.
#[derive(Debug)]
pub struct SimulationReport {
    /// Operations committed by the store.
    pub committed: u64,
    /// Pages left in the store.
    pub pages: usize,
    /// Queue counters after the workload drained.
    pub queue: QueueStats,
    /// Dispatcher counters.
    pub dispatcher: DispatcherStats,
    /// Keys the dispatcher's stale guard still tracks.
    pub tracked_keys: usize,
    /// Dead letters replayed after the first drain.
    pub replayed: usize,
    /// Dead letters left after the replay.
    pub dead_letters: usize,
    /// Whether a full reindex was needed to converge.
    pub reindexed: bool,
    /// Whether the index mirrors the store.
    pub converged: bool,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
}

/// Runs the simulate command.
pub async fn run(
    entities: u64,
    workers: usize,
    fail_every: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = SimulationConfig {
        entities,
        workers,
        fail_every,
    };
    println!(
        "Simulating {} page(s) on {} worker(s){}",
        entities,
        workers,
        fail_every
            .map(|k| format!(", failing every {k}th index call"))
            .unwrap_or_default()
    );
    println!();

    let report = simulate(config).await?;
    print_report(&report);
    Ok(())
}

/// Runs the workload and reports how the index ended up.
pub async fn simulate(
    config: SimulationConfig,
) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    let pipeline = match config.fail_every {
        Some(0) => return Err("--fail-every must be at least 1".into()),
        Some(k) => TestPipeline::wrapped(|index| {
            Arc::new(FlakyManager::new(index, FailurePlan::EveryNth(k))) as Arc<dyn IndexManager>
        }),
        None => TestPipeline::new(),
    };

    let started = Instant::now();
    let dead_letters = Arc::new(DeadLetterLog::new());
    let queue_config = QueueConfig::default()
        .with_workers(config.workers)
        .with_retry(RetryConfig::new(3).with_initial_delay(Duration::from_millis(5)));
    let queue = IndexQueue::start(
        queue_config,
        Arc::clone(&pipeline.dispatcher),
        Arc::clone(&dead_letters),
    )?;
    pipeline.store.on_commit(queue.hook());

    run_workload(&pipeline, config.entities)?;
    queue.flush().await?;

    let replayed = if dead_letters.is_empty() {
        0
    } else {
        let replayed = dead_letters.replay(&queue).await?;
        queue.flush().await?;
        replayed
    };

    let mut converged = pipeline.index_matches_store();
    let mut reindexed = false;
    if !converged {
        match pipeline.dispatcher.reindex(&page_type()) {
            Ok(count) => tracing::info!(count, "reindexed pages"),
            Err(err) => tracing::warn!(error = %err, "reindex failed"),
        }
        reindexed = true;
        converged = pipeline.index_matches_store();
    }

    queue.shutdown().await;

    Ok(SimulationReport {
        committed: pipeline.store.last_sequence().as_u64(),
        pages: pipeline.store.len(),
        queue: queue.stats(),
        dispatcher: pipeline.dispatcher.stats(),
        tracked_keys: pipeline.dispatcher.tracked_keys(),
        replayed,
        dead_letters: dead_letters.len(),
        reindexed,
        converged,
        elapsed: started.elapsed(),
    })
}

/// Creates, renames and deletes pages.
///
/// Pages are grouped in sections whose first page is the parent of the
/// others. The first section is deleted as a whole, so its children are
/// removed by cascade. Every seventh page left is deleted on its own.
fn run_workload(pipeline: &TestPipeline, entities: u64) -> Result<(), Box<dyn std::error::Error>> {
    let store = &pipeline.store;

    for id in 1..=entities {
        let root = section_root(id);
        let mut entity = page(id, &format!("Page {id}"));
        if root != id {
            entity = entity.with_parent(root);
        }
        store.create(entity)?;
    }

    for id in 1..=entities {
        let root = section_root(id);
        let mut entity = page(id, &format!("Page {id} revised"));
        if root != id {
            entity = entity.with_parent(root);
        }
        store.update(entity)?;
    }

    if entities > 0 {
        store.delete(&page_type(), &EntityId::Int(1))?;
    }
    for id in (SECTION_SIZE + 1..=entities).filter(|id| id % 7 == 0) {
        // Section roots may have taken this page with them.
        if store.load(&page_type(), &EntityId::Int(id))?.is_some() {
            store.delete(&page_type(), &EntityId::Int(id))?;
        }
    }

    Ok(())
}

fn section_root(id: u64) -> u64 {
    (id - 1) / SECTION_SIZE * SECTION_SIZE + 1
}

fn print_report(report: &SimulationReport) {
    println!("Committed operations: {}", report.committed);
    println!("Pages in store:       {}", report.pages);
    println!();

    let queue = &report.queue;
    println!("Queue:");
    println!("  enqueued       {}", queue.enqueued);
    println!("  applied        {}", queue.applied);
    println!("  retried        {}", queue.retried);
    println!("  timed out      {}", queue.timed_out);
    println!("  dead-lettered  {}", queue.dead_lettered);
    println!("  rejected       {}", queue.rejected);
    println!("  in flight      {}", queue.in_flight);
    println!();

    let dispatcher = &report.dispatcher;
    println!("Dispatcher:");
    println!("  inserted  {}", dispatcher.inserted);
    println!("  updated   {}", dispatcher.updated);
    println!("  deleted   {}", dispatcher.deleted);
    println!("  degraded  {}", dispatcher.degraded);
    println!("  skipped   {}", dispatcher.skipped);
    println!("  stale     {}", dispatcher.stale);
    println!("  failed    {}", dispatcher.failed);
    println!("  tracked   {}", report.tracked_keys);
    println!();

    if report.replayed > 0 {
        println!("Replayed dead letters: {}", report.replayed);
    }
    if report.dead_letters > 0 {
        println!("Dead letters left:     {}", report.dead_letters);
    }
    if report.reindexed {
        println!("Full reindex was needed.");
    }
    println!(
        "Index {} the store ({:.2?})",
        if report.converged { "matches" } else { "DIFFERS FROM" },
        report.elapsed
    );
}
