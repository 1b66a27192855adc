//! Failure reporting.

use crate::error::IndexError;
use crate::operation::IndexOperation;
use parking_lot::Mutex;
use std::time::SystemTime;

/// Sink for index failures that were isolated from the caller.
///
/// Implementations must not panic; the dispatcher calls this on the thread
/// that committed the mutation when dispatching synchronously.
pub trait FailureReporter: Send + Sync {
    /// Records a failure to apply an operation.
    fn report_failure(&self, operation: &IndexOperation, error: &IndexError);
}

/// Logs failures through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl FailureReporter for TracingReporter {
    fn report_failure(&self, operation: &IndexOperation, error: &IndexError) {
        tracing::warn!(
            kind = %operation.kind,
            entity_type = %operation.entity_type,
            entity_id = %operation.entity_id,
            sequence = operation.sequence.as_u64(),
            retryable = error.is_retryable(),
            error = %error,
            "index operation failed"
        );
    }
}

/// Discards failures.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl FailureReporter for NullReporter {
    fn report_failure(&self, _operation: &IndexOperation, _error: &IndexError) {}
}

/// A recorded failure.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureReport {
    /// The operation that failed.
    pub operation: IndexOperation,
    /// The error raised while applying it.
    pub error: IndexError,
    /// When the failure was recorded.
    pub at: SystemTime,
}

/// Keeps failures in memory, for tests and inspection.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    reports: Mutex<Vec<FailureReport>>,
}

impl MemoryReporter {
    /// Creates an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded failures.
    pub fn reports(&self) -> Vec<FailureReport> {
        self.reports.lock().clone()
    }

    /// Returns the number of recorded failures.
    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }

    /// Removes and returns all recorded failures.
    pub fn take(&self) -> Vec<FailureReport> {
        std::mem::take(&mut *self.reports.lock())
    }
}

impl FailureReporter for MemoryReporter {
    fn report_failure(&self, operation: &IndexOperation, error: &IndexError) {
        self.reports.lock().push(FailureReport {
            operation: operation.clone(),
            error: error.clone(),
            at: SystemTime::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityType;

    #[test]
    fn memory_reporter_records() {
        let reporter = MemoryReporter::new();
        let op = IndexOperation::insert(EntityType::new("webpage"), 1u64);

        reporter.report_failure(&op, &IndexError::Timeout);
        reporter.report_failure(&op, &IndexError::backend_fatal("bad mapping"));

        let reports = reporter.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].operation, op);
        assert_eq!(reports[0].error, IndexError::Timeout);

        assert_eq!(reporter.take().len(), 2);
        assert!(reporter.is_empty());
    }

    #[test]
    fn tracing_and_null_reporters_do_not_panic() {
        let op = IndexOperation::delete(EntityType::new("webpage"), 1u64);
        TracingReporter.report_failure(&op, &IndexError::Timeout);
        NullReporter.report_failure(&op, &IndexError::Timeout);
    }
}
