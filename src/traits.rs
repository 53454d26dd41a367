//! Traits for the collaborators the engine is wired to

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::reconciliation::{ReconciliationReport, Stage};
use crate::types::*;

/// Opaque reference to one ledger snapshot held by an ingestion adapter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceHandle(String);

impl SourceHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ingestion abstraction for ledger records
///
/// File uploads, API payloads and database queries are all adapters behind
/// this one capability. Implementations must return records in their
/// original order and must return the same sequence every time they are
/// asked for the same handle.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch every record of one ledger snapshot
    async fn fetch_records(&self, side: Side, handle: &SourceHandle)
        -> ReconResult<Vec<RawRecord>>;
}

/// Storage abstraction for finished reports
///
/// The engine saves at most once per completed run.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Persist a report and return its identifier
    async fn save_report(&mut self, report: &ReconciliationReport) -> ReconResult<ReportId>;

    /// Load a previously saved report
    async fn load_report(&self, report_id: ReportId) -> ReconResult<ReconciliationReport>;
}

/// Receives progress updates while a run is executing
pub trait ProgressReporter: Send + Sync {
    fn report_progress(&self, run_id: Uuid, stage: Stage, processed: usize);
}

/// Progress reporter that forwards updates to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn report_progress(&self, run_id: Uuid, stage: Stage, processed: usize) {
        tracing::debug!(%run_id, %stage, processed, "reconciliation progress");
    }
}
