//! Run orchestration: sequences normalize → match → classify → report for
//! one run and owns its [`RunState`]

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ReconciliationConfig;
use crate::reconciliation::classifier::{classify, classify_sharded};
use crate::reconciliation::matcher::match_records;
use crate::reconciliation::normalizer::normalize_ledger;
use crate::reconciliation::report::{ReconciliationReport, ReportBuilder, RunMetadata};
use crate::traits::*;
use crate::types::*;
use crate::utils::input_fingerprint;

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Pipeline stage a run is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Ingesting,
    Normalizing,
    Matching,
    Classifying,
    Reporting,
    Persisting,
    Finished,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Queued => "queued",
            Stage::Ingesting => "ingesting",
            Stage::Normalizing => "normalizing",
            Stage::Matching => "matching",
            Stage::Classifying => "classifying",
            Stage::Reporting => "reporting",
            Stage::Persisting => "persisting",
            Stage::Finished => "finished",
        };
        write!(f, "{name}")
    }
}

/// Progress and outcome of a single reconciliation run
///
/// Held by whoever schedules the run and passed to the [`Reconciler`] on
/// each invocation; only the reconciler mutates it. `Completed` and
/// `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    run_id: Uuid,
    status: RunStatus,
    stage: Stage,
    processed: usize,
    attempt: u32,
    error: Option<ReconError>,
    input_fingerprint: Option<String>,
    report_id: Option<ReportId>,
    started_at: Option<NaiveDateTime>,
    finished_at: Option<NaiveDateTime>,
}

impl RunState {
    /// A pending run with the given identifier
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            status: RunStatus::Pending,
            stage: Stage::Queued,
            processed: 0,
            attempt: 1,
            error: None,
            input_fingerprint: None,
            report_id: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// A pending run with a fresh identifier
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Records processed so far in the current stage
    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The error that failed the run
    pub fn error(&self) -> Option<&ReconError> {
        self.error.as_ref()
    }

    pub fn input_fingerprint(&self) -> Option<&str> {
        self.input_fingerprint.as_deref()
    }

    /// Identifier of the persisted report, once completed
    pub fn report_id(&self) -> Option<ReportId> {
        self.report_id
    }

    pub fn started_at(&self) -> Option<NaiveDateTime> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<NaiveDateTime> {
        self.finished_at
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RunStatus::Completed | RunStatus::Failed)
    }

    /// A new pending attempt of a failed run, under the same run id
    pub fn retry(&self) -> ReconResult<RunState> {
        if self.status != RunStatus::Failed {
            return Err(ReconError::InvalidRunState(format!(
                "Run {} is {:?}; only failed runs can be retried",
                self.run_id, self.status
            )));
        }
        let mut next = RunState::new(self.run_id);
        next.attempt = self.attempt + 1;
        Ok(next)
    }

    fn begin(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(chrono::Utc::now().naive_utc());
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.processed = 0;
    }

    fn complete(&mut self, report_id: ReportId, fingerprint: String) {
        self.status = RunStatus::Completed;
        self.stage = Stage::Finished;
        self.report_id = Some(report_id);
        self.input_fingerprint = Some(fingerprint);
        self.finished_at = Some(chrono::Utc::now().naive_utc());
    }

    fn fail(&mut self, error: ReconError) {
        self.status = RunStatus::Failed;
        if self.error.is_none() {
            self.error = Some(error);
        }
        self.finished_at = Some(chrono::Utc::now().naive_utc());
    }
}

/// Cooperative cancellation signal, checked between pipeline stages
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The two ledger snapshots a run reconciles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub source: SourceHandle,
    pub target: SourceHandle,
    /// Time the snapshots represent; recorded in the report metadata
    pub as_of: NaiveDateTime,
}

impl RunRequest {
    pub fn new(source: SourceHandle, target: SourceHandle, as_of: NaiveDateTime) -> Self {
        Self {
            source,
            target,
            as_of,
        }
    }
}

/// Entry point of the engine, invoked by the job-execution layer
pub struct Reconciler<R: RecordSource, P: ReportStore> {
    records: R,
    store: P,
    progress: Box<dyn ProgressReporter>,
}

impl<R: RecordSource, P: ReportStore> Reconciler<R, P> {
    /// Create a reconciler that logs progress through `tracing`
    pub fn new(records: R, store: P) -> Self {
        Self::with_progress(records, store, Box::new(TracingProgress))
    }

    /// Create a reconciler with a custom progress reporter
    pub fn with_progress(records: R, store: P, progress: Box<dyn ProgressReporter>) -> Self {
        Self {
            records,
            store,
            progress,
        }
    }

    /// Load a persisted report by id
    pub async fn load_report(&self, report_id: ReportId) -> ReconResult<ReconciliationReport> {
        self.store.load_report(report_id).await
    }

    /// Execute one reconciliation run
    ///
    /// A pending run moves to `Running` and ends `Completed` (report saved
    /// exactly once) or `Failed` (first error retained on `state`, nothing
    /// saved). Invoking a completed run again with unchanged inputs
    /// recomputes and returns the identical report without saving it a
    /// second time; changed inputs fail with [`ReconError::SnapshotChanged`].
    pub async fn run_reconciliation(
        &mut self,
        state: &mut RunState,
        request: &RunRequest,
        config: &ReconciliationConfig,
        cancel: &CancellationFlag,
    ) -> ReconResult<ReconciliationReport> {
        match state.status {
            RunStatus::Pending => {}
            RunStatus::Completed => return self.replay(state, request, config, cancel).await,
            RunStatus::Running => {
                return Err(ReconError::InvalidRunState(format!(
                    "Run {} is already running",
                    state.run_id
                )))
            }
            RunStatus::Failed => {
                return Err(ReconError::InvalidRunState(format!(
                    "Run {} has failed; start a retry attempt instead",
                    state.run_id
                )))
            }
        }

        state.begin();
        tracing::info!(
            run_id = %state.run_id,
            attempt = state.attempt,
            source = %request.source,
            target = %request.target,
            "reconciliation started"
        );

        match self.execute(state, request, config, cancel).await {
            Ok(report) => {
                tracing::info!(
                    run_id = %state.run_id,
                    matched = report.summary.matched,
                    mismatched = report.summary.mismatched,
                    missing_in_target = report.summary.missing_in_target,
                    missing_in_source = report.summary.missing_in_source,
                    duplicates = report.summary.duplicates,
                    "reconciliation completed"
                );
                Ok(report)
            }
            Err(error) => {
                tracing::error!(run_id = %state.run_id, stage = %state.stage, %error, "reconciliation failed");
                state.fail(error.clone());
                Err(error)
            }
        }
    }

    async fn execute(
        &mut self,
        state: &mut RunState,
        request: &RunRequest,
        config: &ReconciliationConfig,
        cancel: &CancellationFlag,
    ) -> ReconResult<ReconciliationReport> {
        config.validate()?;

        let (source, target) = self.ingest(state, request, cancel).await?;
        let fingerprint = input_fingerprint(config, &request.as_of, &source, &target)?;
        let report = self.pipeline(state, request, config, cancel, &source, &target, &fingerprint)?;

        self.checkpoint(state, cancel, Stage::Persisting)?;
        let report_id = self.store.save_report(&report).await?;
        state.complete(report_id, fingerprint);
        Ok(report)
    }

    async fn replay(
        &self,
        state: &RunState,
        request: &RunRequest,
        config: &ReconciliationConfig,
        cancel: &CancellationFlag,
    ) -> ReconResult<ReconciliationReport> {
        config.validate()?;

        // a scratch state keeps the completed one untouched
        let mut scratch = RunState::new(state.run_id);
        scratch.begin();
        let (source, target) = self.ingest(&mut scratch, request, cancel).await?;
        let fingerprint = input_fingerprint(config, &request.as_of, &source, &target)?;
        if state.input_fingerprint.as_deref() != Some(fingerprint.as_str()) {
            tracing::warn!(run_id = %state.run_id, "completed run re-invoked with changed inputs");
            return Err(ReconError::SnapshotChanged(state.run_id));
        }

        tracing::info!(run_id = %state.run_id, "replaying completed run");
        self.pipeline(&mut scratch, request, config, cancel, &source, &target, &fingerprint)
    }

    async fn ingest(
        &self,
        state: &mut RunState,
        request: &RunRequest,
        cancel: &CancellationFlag,
    ) -> ReconResult<(Vec<RawRecord>, Vec<RawRecord>)> {
        self.checkpoint(state, cancel, Stage::Ingesting)?;
        let source = self.fetch(Side::Source, &request.source).await?;
        let target = self.fetch(Side::Target, &request.target).await?;
        state.processed = source.len() + target.len();
        self.progress
            .report_progress(state.run_id, Stage::Ingesting, state.processed);
        Ok((source, target))
    }

    async fn fetch(&self, side: Side, handle: &SourceHandle) -> ReconResult<Vec<RawRecord>> {
        self.records
            .fetch_records(side, handle)
            .await
            .map_err(|error| match error {
                ReconError::Ingestion { .. } => error,
                other => ReconError::Ingestion {
                    side,
                    message: other.to_string(),
                },
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn pipeline(
        &self,
        state: &mut RunState,
        request: &RunRequest,
        config: &ReconciliationConfig,
        cancel: &CancellationFlag,
        source: &[RawRecord],
        target: &[RawRecord],
        fingerprint: &str,
    ) -> ReconResult<ReconciliationReport> {
        let run_id = state.run_id;
        let reporter = self.progress.as_ref();

        self.checkpoint(state, cancel, Stage::Normalizing)?;
        let source_ledger = normalize_ledger(source, Side::Source, config, |n| {
            state.processed = n;
            reporter.report_progress(run_id, Stage::Normalizing, n);
        });
        let offset = source.len();
        let target_ledger = normalize_ledger(target, Side::Target, config, |n| {
            state.processed = offset + n;
            reporter.report_progress(run_id, Stage::Normalizing, offset + n);
        });
        state.processed = source.len() + target.len();

        self.checkpoint(state, cancel, Stage::Matching)?;
        let matched = match_records(
            source_ledger.records,
            target_ledger.records,
            config.duplicate_policy,
        )?;
        state.processed = matched.candidates.len();
        tracing::debug!(
            %run_id,
            candidates = matched.candidates.len(),
            duplicate_keys = matched.duplicates.len(),
            "matching finished"
        );

        self.checkpoint(state, cancel, Stage::Classifying)?;
        let mut outcomes = Vec::with_capacity(matched.candidates.len());
        if config.classification_shards <= 1 {
            for candidate in &matched.candidates {
                outcomes.push(classify(candidate, config));
                if outcomes.len() % config.progress_interval == 0 {
                    state.processed = outcomes.len();
                    reporter.report_progress(run_id, Stage::Classifying, outcomes.len());
                }
            }
        } else {
            let window = config
                .progress_interval
                .saturating_mul(config.classification_shards);
            for batch in matched.candidates.chunks(window) {
                outcomes.extend(classify_sharded(batch, config, config.classification_shards));
                state.processed = outcomes.len();
                reporter.report_progress(run_id, Stage::Classifying, outcomes.len());
            }
        }
        state.processed = outcomes.len();

        self.checkpoint(state, cancel, Stage::Reporting)?;
        let mut rejected = source_ledger.rejected;
        rejected.extend(target_ledger.rejected);
        let metadata = RunMetadata {
            run_id,
            as_of: request.as_of,
            source_records: source.len(),
            target_records: target.len(),
            input_fingerprint: fingerprint.to_string(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        ReportBuilder::new(metadata)
            .rejected(rejected)
            .duplicate_keys(matched.duplicates)
            .build(outcomes)
    }

    /// Stage boundary: honour cancellation, then enter the next stage
    fn checkpoint(
        &self,
        state: &mut RunState,
        cancel: &CancellationFlag,
        next: Stage,
    ) -> ReconResult<()> {
        if state.stage != Stage::Queued {
            self.progress
                .report_progress(state.run_id, state.stage, state.processed);
        }
        if cancel.is_cancelled() {
            tracing::info!(run_id = %state.run_id, stage = %next, "reconciliation cancelled");
            return Err(ReconError::Cancelled(state.run_id));
        }
        tracing::debug!(run_id = %state.run_id, stage = %next, "entering stage");
        state.enter(next);
        Ok(())
    }
}
