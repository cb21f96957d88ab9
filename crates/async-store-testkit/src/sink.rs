//! Diagnostic sink that keeps everything it receives

use std::sync::Arc;

use async_store::{Diagnostic, DiagnosticLevel, DiagnosticSink};
use parking_lot::Mutex;

/// One diagnostic as the sink received it
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDiagnostic {
    /// Emitting component
    pub component: String,
    /// Severity
    pub level: DiagnosticLevel,
    /// The diagnostic itself
    pub diagnostic: Diagnostic,
}

impl RecordedDiagnostic {
    /// Rendered log line, e.g. `[WARNING] [AsyncStore] ...`
    pub fn line(&self) -> String {
        format!("{} [{}] {}", self.level.tag(), self.component, self.diagnostic)
    }
}

/// Collects diagnostics for later assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<RecordedDiagnostic>>,
}

impl RecordingSink {
    /// Empty sink, ready to hand to a store builder
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything recorded so far
    pub fn records(&self) -> Vec<RecordedDiagnostic> {
        self.records.lock().clone()
    }

    /// Rendered lines of everything recorded so far
    pub fn lines(&self) -> Vec<String> {
        self.records.lock().iter().map(RecordedDiagnostic::line).collect()
    }

    /// Whether any rendered line contains `needle`
    pub fn contains_message(&self, needle: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|record| record.line().contains(needle))
    }

    /// Number of records matching `predicate`
    pub fn count(&self, predicate: impl Fn(&Diagnostic) -> bool) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|record| predicate(&record.diagnostic))
            .count()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl DiagnosticSink for RecordingSink {
    fn record(&self, component: &str, level: DiagnosticLevel, diagnostic: &Diagnostic) {
        self.records.lock().push(RecordedDiagnostic {
            component: component.to_string(),
            level,
            diagnostic: diagnostic.clone(),
        });
    }
}
