//! Replay command implementation.
//!
//! The pipeline built here is in-memory. Entities are restored from the
//! payload snapshots carried by the dead-lettered operations, and every
//! entity type seen in the file gets a token index.

use indexsync_core::{
    DispatcherStats, Entity, EntityType, IndexManager, IndexManagerRegistry, IndexOperation,
    MemoryEntityStore, MemoryIndexManager, OperationKind, TaskDispatcher, TracingReporter,
};
use indexsync_queue::{
    DeadLetter, DeadLetterLog, IndexQueue, QueueConfig, QueueStats, RetryConfig,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Result of a replay.
#[derive(Debug)]
pub struct ReplayReport {
    /// Entries read from the file.
    pub loaded: usize,
    /// Entries skipped because their operation is malformed.
    pub invalid: usize,
    /// Entities restored from payload snapshots.
    pub restored: usize,
    /// Operations enqueued again.
    pub replayed: usize,
    /// Documents per entity type after the replay.
    pub documents: Vec<(EntityType, usize)>,
    /// Dispatcher counters.
    pub dispatcher: DispatcherStats,
    /// Queue counters.
    pub queue: QueueStats,
    /// Operations that were dead-lettered again.
    pub failed_again: Vec<DeadLetter>,
}

/// Runs the replay command.
///
/// The input file is only read. Replaying happens against a throwaway
/// pipeline, so entries stay in the file whatever the outcome.
pub async fn run(
    file: &Path,
    input: &str,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    if !file.exists() {
        return Err(format!("dead-letter file not found: {}", file.display()).into());
    }

    let letters = match input {
        "cbor" => load_cbor(file)?,
        "json" => DeadLetterLog::load(file)?,
        other => return Err(format!("unknown input format: {other}").into()),
    };
    println!("Replaying {} dead letter(s) from {:?}", letters.len(), file);
    println!();

    let report = replay(letters, output).await?;
    print_report(&report);
    Ok(())
}

/// Reads hex CBOR operations, one per line, as written by
/// `dead-letters --format cbor`. They carry no attempt history.
pub fn load_cbor(file: &Path) -> Result<Vec<DeadLetter>, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(file)?;
    let mut letters = Vec::new();
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let bytes = super::hex_decode(line).map_err(|e| format!("line {}: {e}", number + 1))?;
        let operation =
            IndexOperation::decode(&bytes).map_err(|e| format!("line {}: {e}", number + 1))?;
        letters.push(DeadLetter::new(operation, 0, "exported"));
    }
    Ok(letters)
}

/// Replays dead letters through a fresh in-memory pipeline.
pub async fn replay(
    letters: Vec<DeadLetter>,
    output: Option<&Path>,
) -> Result<ReplayReport, Box<dyn std::error::Error>> {
    let loaded = letters.len();
    let (valid, invalid): (Vec<_>, Vec<_>) = letters
        .into_iter()
        .partition(|letter| letter.operation.validate().is_ok());
    for letter in &invalid {
        tracing::warn!(operation = %letter.operation, "skipping malformed dead letter");
    }

    let store = Arc::new(MemoryEntityStore::new());
    let restored = restore_entities(&store, &valid);

    let entity_types: BTreeSet<EntityType> = valid
        .iter()
        .map(|letter| letter.operation.entity_type.clone())
        .collect();
    let mut indexes = Vec::with_capacity(entity_types.len());
    let mut builder = IndexManagerRegistry::builder();
    for entity_type in entity_types {
        let index = Arc::new(MemoryIndexManager::new(entity_type));
        builder = builder.register(index.clone() as Arc<dyn IndexManager>)?;
        indexes.push(index);
    }

    let dispatcher = Arc::new(TaskDispatcher::new(
        builder.build(),
        store,
        Arc::new(TracingReporter),
    ));
    let failures = Arc::new(match output {
        Some(path) => DeadLetterLog::with_file(path),
        None => DeadLetterLog::new(),
    });
    let config = QueueConfig::default()
        .with_retry(RetryConfig::new(3).with_initial_delay(Duration::from_millis(10)));
    let queue = IndexQueue::start(config, Arc::clone(&dispatcher), Arc::clone(&failures))?;

    let pending = DeadLetterLog::new();
    for letter in valid {
        pending.record(letter)?;
    }
    let replayed = pending.replay(&queue).await?;
    queue.flush().await?;
    queue.shutdown().await;

    Ok(ReplayReport {
        loaded,
        invalid: invalid.len(),
        restored,
        replayed,
        documents: indexes
            .iter()
            .map(|index| (index.entity_type().clone(), index.len()))
            .collect(),
        dispatcher: dispatcher.stats(),
        queue: queue.stats(),
        failed_again: failures.entries(),
    })
}

/// Saves the latest snapshot of every entity carried by an insert or update.
fn restore_entities(store: &MemoryEntityStore, letters: &[DeadLetter]) -> usize {
    let mut restored = BTreeSet::new();
    for letter in letters {
        let operation = &letter.operation;
        if operation.kind == OperationKind::Delete {
            continue;
        }
        let Some(payload) = operation.payload.as_deref() else {
            continue;
        };
        match Entity::from_payload(payload).and_then(|entity| store.save(entity)) {
            Ok(_) => {
                restored.insert(operation.key());
            }
            Err(err) => {
                tracing::warn!(
                    operation = %operation,
                    error = %err,
                    "cannot restore entity snapshot"
                );
            }
        }
    }
    restored.len()
}

fn print_report(report: &ReplayReport) {
    println!("Loaded:    {}", report.loaded);
    println!("Invalid:   {}", report.invalid);
    println!("Restored:  {}", report.restored);
    println!("Replayed:  {}", report.replayed);
    println!();

    let stats = &report.dispatcher;
    println!("Outcomes:");
    println!("  inserted  {}", stats.inserted);
    println!("  updated   {}", stats.updated);
    println!("  deleted   {}", stats.deleted);
    println!("  degraded  {}", stats.degraded);
    println!("  skipped   {}", stats.skipped);
    println!("  stale     {}", stats.stale);
    println!("  failed    {}", stats.failed);
    println!();

    println!("Documents:");
    for (entity_type, count) in &report.documents {
        println!("  {:<16} {}", entity_type, count);
    }

    if report.failed_again.is_empty() {
        println!();
        println!("All operations settled.");
    } else {
        println!();
        println!("Failed again: {}", report.failed_again.len());
        for letter in &report.failed_again {
            println!("  {}", super::dead_letters::describe(letter));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexsync_core::{SequenceNumber, SiteId};

    fn page(id: u64, title: &str) -> Entity {
        Entity::new(EntityType::new("webpage"), id, SiteId::new(1)).with_field("title", title)
    }

    fn insert_with_snapshot(entity: &Entity, seq: u64) -> DeadLetter {
        let op = IndexOperation::insert(entity.entity_type.clone(), entity.id)
            .with_sequence(SequenceNumber::new(seq))
            .with_payload(entity.to_payload().unwrap());
        DeadLetter::new(op, 3, "index backend unavailable: down")
    }

    #[tokio::test]
    async fn restores_and_indexes_snapshots() {
        let letters = vec![
            insert_with_snapshot(&page(1, "Home"), 1),
            insert_with_snapshot(&page(2, "About"), 2),
        ];

        let report = replay(letters, None).await.unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(report.restored, 2);
        assert_eq!(report.replayed, 2);
        assert_eq!(report.dispatcher.inserted, 2);
        assert_eq!(report.documents, vec![(EntityType::new("webpage"), 2)]);
        assert!(report.failed_again.is_empty());
    }

    #[tokio::test]
    async fn insert_without_snapshot_degrades() {
        let op = IndexOperation::insert(EntityType::new("webpage"), 5u64);
        let letters = vec![DeadLetter::new(op, 3, "timed out")];

        let report = replay(letters, None).await.unwrap();
        assert_eq!(report.restored, 0);
        assert_eq!(report.dispatcher.degraded, 1);
        assert_eq!(report.documents, vec![(EntityType::new("webpage"), 0)]);
    }

    #[tokio::test]
    async fn malformed_entries_are_skipped() {
        let op = IndexOperation::delete(EntityType::new(""), 1u64);
        let letters = vec![DeadLetter::new(op, 0, "partition 0 is full")];

        let report = replay(letters, None).await.unwrap();
        assert_eq!(report.invalid, 1);
        assert_eq!(report.replayed, 0);
        assert!(report.documents.is_empty());
    }

    #[tokio::test]
    async fn run_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dead.jsonl");
        let log = DeadLetterLog::with_file(&path);
        log.record(insert_with_snapshot(&page(3, "Blog"), 7)).unwrap();

        run(&path, "json", None).await.unwrap();
        assert_eq!(DeadLetterLog::load(&path).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replays_cbor_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.hex");
        let letters = [
            insert_with_snapshot(&page(1, "Home"), 1),
            insert_with_snapshot(&page(2, "About"), 2),
        ];
        let lines: Vec<String> = letters
            .iter()
            .map(|l| super::super::dead_letters::encode_operation(l).unwrap())
            .collect();
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();

        let loaded = load_cbor(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].operation, letters[1].operation);
        assert_eq!(loaded[0].attempts, 0);

        let report = replay(loaded, None).await.unwrap();
        assert_eq!(report.restored, 2);
        assert_eq!(report.dispatcher.inserted, 2);
    }

    #[test]
    fn cbor_input_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.hex");
        std::fs::write(&path, "a1ff\n").unwrap();
        assert!(load_cbor(&path).is_err());
    }
}
