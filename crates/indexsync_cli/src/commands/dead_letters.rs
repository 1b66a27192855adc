//! Dead-letters command implementation.

use indexsync_core::OperationKind;
use indexsync_queue::{DeadLetter, DeadLetterLog};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Summary of a dead-letter file.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct DeadLetterSummary {
    /// Number of entries.
    pub total: usize,
    /// Entries per operation kind.
    pub by_kind: BTreeMap<String, usize>,
    /// Entries per entity type.
    pub by_entity_type: BTreeMap<String, usize>,
    /// Entries rejected at enqueue, never attempted.
    pub never_attempted: usize,
}

impl DeadLetterSummary {
    /// Summarizes a set of dead letters.
    pub fn from_letters(letters: &[DeadLetter]) -> Self {
        let mut summary = Self {
            total: letters.len(),
            ..Self::default()
        };
        for letter in letters {
            *summary
                .by_kind
                .entry(letter.operation.kind.as_str().to_string())
                .or_default() += 1;
            *summary
                .by_entity_type
                .entry(letter.operation.entity_type.to_string())
                .or_default() += 1;
            if letter.attempts == 0 {
                summary.never_attempted += 1;
            }
        }
        summary
    }
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    summary: DeadLetterSummary,
    entries: &'a [DeadLetter],
}

/// Runs the dead-letters command.
pub fn run(file: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !file.exists() {
        return Err(format!("dead-letter file not found: {}", file.display()).into());
    }

    let letters = DeadLetterLog::load(file)?;
    let summary = DeadLetterSummary::from_letters(&letters);

    match format {
        "cbor" => {
            for letter in &letters {
                println!("{}", encode_operation(letter)?);
            }
        }
        "json" => {
            let output = JsonOutput {
                summary,
                entries: &letters,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            print_text_output(file, &letters, &summary);
        }
    }

    Ok(())
}

fn print_text_output(file: &Path, letters: &[DeadLetter], summary: &DeadLetterSummary) {
    println!("Dead letters in {:?}", file);
    println!();

    if letters.is_empty() {
        println!("  (none)");
        return;
    }

    for (i, letter) in letters.iter().enumerate() {
        println!("{:>5}  {}", i, describe(letter));
    }

    println!();
    println!("Total: {}", summary.total);
    for kind in [OperationKind::Insert, OperationKind::Update, OperationKind::Delete] {
        let count = summary.by_kind.get(kind.as_str()).copied().unwrap_or(0);
        println!("  {:<8} {}", kind.as_str(), count);
    }
    for (entity_type, count) in &summary.by_entity_type {
        println!("  type {:<16} {}", entity_type, count);
    }
    if summary.never_attempted > 0 {
        println!("  rejected at enqueue: {}", summary.never_attempted);
    }
}

/// Encodes an entry's operation as hex CBOR, the input `replay --input cbor` reads.
pub fn encode_operation(letter: &DeadLetter) -> Result<String, indexsync_core::CoreError> {
    Ok(super::hex_encode(&letter.operation.encode()?))
}

/// Formats one entry as a single line.
pub fn describe(letter: &DeadLetter) -> String {
    let mut line = format!(
        "{:<40} attempts={} error={}",
        letter.operation.to_string(),
        letter.attempts,
        letter.last_error
    );
    if let Some(site) = letter.operation.site {
        line.push_str(&format!(" {}", site));
    }
    line
}
