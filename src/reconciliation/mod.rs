//! Reconciliation engine for two-ledger record matching
//!
//! The pipeline for one run is: [`normalizer`] turns raw records into
//! canonical records, [`matcher`] pairs them by key, [`classifier`] compares
//! each pair under the configured tolerances, and [`report`] aggregates the
//! outcomes. [`orchestrator`] drives the stages and owns the run state.

pub mod classifier;
pub mod matcher;
pub mod normalizer;
pub mod orchestrator;
pub mod report;

pub use classifier::{classify, classify_sharded};
pub use matcher::{match_records, MatchCandidate, MatchOutput};
pub use normalizer::{normalize, normalize_ledger, NormalizedLedger};
pub use orchestrator::{CancellationFlag, Reconciler, RunRequest, RunState, RunStatus, Stage};
pub use report::{ReconciliationReport, ReportBuilder, ReportSummary, RunMetadata};
