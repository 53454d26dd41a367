//! Aggregation of per-record outcomes into a reconciliation report

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

use crate::types::*;

/// Descriptive data about the run a report was produced by
///
/// Contains nothing derived from wall-clock time: `as_of` is the snapshot
/// time supplied by the caller, so re-running unchanged inputs produces the
/// same metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub as_of: NaiveDateTime,
    pub source_records: usize,
    pub target_records: usize,
    pub input_fingerprint: String,
    pub engine_version: String,
}

/// Summary counts of a report
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    pub matched: usize,
    pub mismatched: usize,
    pub missing_in_target: usize,
    pub missing_in_source: usize,
    pub duplicates: usize,
    pub rejected_source: usize,
    pub rejected_target: usize,
    /// `matched / (matched + mismatched)`, four decimal places; `None` when
    /// no pair was compared
    pub match_rate: Option<BigDecimal>,
}

impl ReportSummary {
    /// Number of source/target pairs that were compared field by field
    pub fn total_compared(&self) -> usize {
        self.matched + self.mismatched
    }
}

/// Complete result of one reconciliation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub metadata: RunMetadata,
    pub summary: ReportSummary,
    /// Every outcome, in key-encounter order
    pub outcomes: Vec<Outcome>,
    /// Records excluded during normalization, source side first
    pub rejected: Vec<RejectedRecord>,
    /// Keys that occurred more than once on a side
    pub duplicate_keys: Vec<MatchKey>,
}

impl ReconciliationReport {
    pub fn run_id(&self) -> Uuid {
        self.metadata.run_id
    }

    /// Outcomes of one kind, in report order
    pub fn outcomes_of(&self, kind: OutcomeKind) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(move |o| o.kind() == kind)
    }

    /// Source records with no counterpart in the target ledger
    pub fn missing_in_target(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes_of(OutcomeKind::MissingInTarget)
    }

    /// Target records with no counterpart in the source ledger
    pub fn missing_in_source(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes_of(OutcomeKind::MissingInSource)
    }

    /// Pairs whose values disagree
    pub fn discrepancies(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes_of(OutcomeKind::Mismatched)
    }

    /// Outcome counts keyed by kind
    pub fn counts(&self) -> BTreeMap<OutcomeKind, usize> {
        let mut counts = BTreeMap::new();
        for outcome in &self.outcomes {
            *counts.entry(outcome.kind()).or_insert(0) += 1;
        }
        counts
    }
}

/// Builder that aggregates outcomes into a [`ReconciliationReport`]
pub struct ReportBuilder {
    metadata: RunMetadata,
    rejected: Vec<RejectedRecord>,
    duplicate_keys: Vec<MatchKey>,
}

impl ReportBuilder {
    /// Start a report for a run
    pub fn new(metadata: RunMetadata) -> Self {
        Self {
            metadata,
            rejected: Vec::new(),
            duplicate_keys: Vec::new(),
        }
    }

    /// Records excluded during normalization
    pub fn rejected(mut self, rejected: Vec<RejectedRecord>) -> Self {
        self.rejected = rejected;
        self
    }

    /// Keys the matcher flagged as duplicated
    pub fn duplicate_keys(mut self, keys: Vec<MatchKey>) -> Self {
        self.duplicate_keys = keys;
        self
    }

    /// Aggregate the outcomes and produce the report
    ///
    /// Verifies that every input record of the run is accounted for exactly
    /// once, either by an outcome or by a rejection, and that no outcome
    /// references a record outside the run.
    pub fn build(self, outcomes: Vec<Outcome>) -> ReconResult<ReconciliationReport> {
        self.check_consistency(&outcomes)?;

        let mut summary = ReportSummary::default();
        for outcome in &outcomes {
            match outcome.kind() {
                OutcomeKind::Matched => summary.matched += 1,
                OutcomeKind::Mismatched => summary.mismatched += 1,
                OutcomeKind::MissingInTarget => summary.missing_in_target += 1,
                OutcomeKind::MissingInSource => summary.missing_in_source += 1,
                OutcomeKind::DuplicateKey => summary.duplicates += 1,
            }
        }
        for rejected in &self.rejected {
            match rejected.record.side {
                Side::Source => summary.rejected_source += 1,
                Side::Target => summary.rejected_target += 1,
            }
        }

        let compared = summary.total_compared();
        if compared > 0 {
            let rate = BigDecimal::from(summary.matched as u64) / BigDecimal::from(compared as u64);
            summary.match_rate = Some(rate.round(4));
        }

        Ok(ReconciliationReport {
            metadata: self.metadata,
            summary,
            outcomes,
            rejected: self.rejected,
            duplicate_keys: self.duplicate_keys,
        })
    }

    fn check_consistency(&self, outcomes: &[Outcome]) -> ReconResult<()> {
        let mut seen_source = vec![false; self.metadata.source_records];
        let mut seen_target = vec![false; self.metadata.target_records];

        let mut account = |record: RecordRef| -> ReconResult<()> {
            let seen = match record.side {
                Side::Source => &mut seen_source,
                Side::Target => &mut seen_target,
            };
            match seen.get_mut(record.position) {
                None => Err(ReconError::MalformedOutcome(format!(
                    "outcome references {}, which is not part of run {}",
                    record, self.metadata.run_id
                ))),
                Some(true) => Err(ReconError::MalformedOutcome(format!(
                    "{} is accounted for more than once",
                    record
                ))),
                Some(flag) => {
                    *flag = true;
                    Ok(())
                }
            }
        };

        let duplicate_keys: HashSet<&MatchKey> = self.duplicate_keys.iter().collect();
        for outcome in outcomes {
            if let Outcome::DuplicateKey { key, record } = outcome {
                if !duplicate_keys.contains(key) {
                    return Err(ReconError::MalformedOutcome(format!(
                        "{} is flagged as duplicate under key '{}', which was not reported as duplicated",
                        record, key
                    )));
                }
            }
            for record in outcome.records() {
                account(record)?;
            }
        }
        for rejected in &self.rejected {
            account(rejected.record)?;
        }

        let dropped = seen_source
            .iter()
            .position(|s| !s)
            .map(|p| RecordRef::new(Side::Source, p))
            .or_else(|| {
                seen_target
                    .iter()
                    .position(|s| !s)
                    .map(|p| RecordRef::new(Side::Target, p))
            });
        if let Some(record) = dropped {
            return Err(ReconError::MalformedOutcome(format!(
                "{} has no outcome",
                record
            )));
        }

        Ok(())
    }
}
