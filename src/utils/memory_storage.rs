//! In-memory collaborators for testing and development

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

use crate::reconciliation::{ReconciliationReport, Stage};
use crate::traits::*;
use crate::types::*;

fn poisoned(what: &str) -> ReconError {
    ReconError::Storage(format!("{what} lock poisoned"))
}

/// In-memory ledger snapshots keyed by handle
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordSource {
    snapshots: Arc<RwLock<HashMap<SourceHandle, Vec<RawRecord>>>>,
    failing: Arc<RwLock<HashSet<SourceHandle>>>,
}

impl MemoryRecordSource {
    /// Create an empty record source
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the snapshot behind a handle
    pub fn insert(&self, handle: impl Into<String>, records: Vec<RawRecord>) {
        if let Ok(mut snapshots) = self.snapshots.write() {
            snapshots.insert(SourceHandle::new(handle), records);
        }
    }

    /// Make every fetch of a handle fail
    pub fn fail_on(&self, handle: impl Into<String>) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(SourceHandle::new(handle));
        }
    }

    /// Undo [`MemoryRecordSource::fail_on`]
    pub fn restore(&self, handle: impl Into<String>) {
        if let Ok(mut failing) = self.failing.write() {
            failing.remove(&SourceHandle::new(handle));
        }
    }
}

#[async_trait]
impl RecordSource for MemoryRecordSource {
    async fn fetch_records(
        &self,
        side: Side,
        handle: &SourceHandle,
    ) -> ReconResult<Vec<RawRecord>> {
        let failing = self.failing.read().map_err(|_| poisoned("record source"))?;
        if failing.contains(handle) {
            return Err(ReconError::Ingestion {
                side,
                message: format!("snapshot '{}' is unavailable", handle),
            });
        }

        self.snapshots
            .read()
            .map_err(|_| poisoned("record source"))?
            .get(handle)
            .cloned()
            .ok_or_else(|| ReconError::Ingestion {
                side,
                message: format!("unknown snapshot '{}'", handle),
            })
    }
}

/// In-memory report storage
///
/// Report ids are the run ids, so saving a second report for the same run
/// is refused.
#[derive(Debug, Clone, Default)]
pub struct MemoryReportStore {
    reports: Arc<RwLock<HashMap<ReportId, ReconciliationReport>>>,
}

impl MemoryReportStore {
    /// Create an empty report store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reports saved
    pub fn save_count(&self) -> usize {
        self.reports.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) {
        if let Ok(mut reports) = self.reports.write() {
            reports.clear();
        }
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn save_report(&mut self, report: &ReconciliationReport) -> ReconResult<ReportId> {
        let report_id = report.run_id();
        let mut reports = self.reports.write().map_err(|_| poisoned("report store"))?;
        if reports.contains_key(&report_id) {
            return Err(ReconError::Storage(format!(
                "Report for run {} is already saved",
                report_id
            )));
        }
        reports.insert(report_id, report.clone());
        Ok(report_id)
    }

    async fn load_report(&self, report_id: ReportId) -> ReconResult<ReconciliationReport> {
        self.reports
            .read()
            .map_err(|_| poisoned("report store"))?
            .get(&report_id)
            .cloned()
            .ok_or(ReconError::ReportNotFound(report_id))
    }
}

/// Progress reporter that keeps every update it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingProgress {
    events: Arc<Mutex<Vec<(Uuid, Stage, usize)>>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// All updates in the order received
    pub fn events(&self) -> Vec<(Uuid, Stage, usize)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Distinct stages that reported progress, in first-seen order
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = Vec::new();
        for (_, stage, _) in self.events() {
            if !stages.contains(&stage) {
                stages.push(stage);
            }
        }
        stages
    }
}

impl ProgressReporter for RecordingProgress {
    fn report_progress(&self, run_id: Uuid, stage: Stage, processed: usize) {
        if let Ok(mut events) = self.events.lock() {
            events.push((run_id, stage, processed));
        }
    }
}
