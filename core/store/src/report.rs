//! Results of multi-version operations.

use serde::{Deserialize, Serialize};

/// Aggregated outcome of an operation touching several versions.
///
/// Per-version failures do not stop the operation; they are collected
/// here and flip `success` to `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationReport {
    /// Whether every version was handled without error.
    pub success: bool,
    /// Number of versions handled successfully.
    pub affected: usize,
    /// Failure and warning messages, in the order they occurred.
    pub messages: Vec<String>,
}

impl OperationReport {
    /// An empty, successful report.
    pub fn new() -> Self {
        Self {
            success: true,
            affected: 0,
            messages: Vec::new(),
        }
    }

    /// Count one version as handled.
    pub fn record_success(&mut self) {
        self.affected += 1;
    }

    /// Record a failure; the report is no longer successful.
    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.success = false;
        self.messages.push(message.into());
    }

    /// Record a message that does not count as a failure.
    pub fn note(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }
}

impl Default for OperationReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts from one reindex pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexSummary {
    /// Items the provider described.
    pub discovered: usize,
    /// Items that were absent from the index and got a new chain.
    pub added: usize,
    /// Items the provider reported as errors; they were skipped.
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_tracks_failures() {
        let mut report = OperationReport::new();
        report.record_success();
        report.note("source copy kept");
        assert!(report.success);

        report.record_failure("version 2: timeout");
        assert!(!report.success);
        assert_eq!(report.affected, 1);
        assert_eq!(report.messages.len(), 2);
    }
}
