//! Field-by-field discrepancy classification of match candidates
//!
//! Classification is a pure function of the candidate and the configuration,
//! which is what allows the candidate list to be split into shards and
//! classified independently.

use bigdecimal::BigDecimal;

use crate::config::{ComparedField, ReconciliationConfig, Tolerance};
use crate::reconciliation::matcher::MatchCandidate;
use crate::reconciliation::normalizer::normalize_text;
use crate::types::*;

/// Classify one candidate into an outcome
pub fn classify(candidate: &MatchCandidate, config: &ReconciliationConfig) -> Outcome {
    match candidate {
        MatchCandidate::Pair { source, target } => {
            let fields: Vec<FieldDiff> = config
                .compared_fields
                .iter()
                .filter_map(|(field, spec)| {
                    compare_field(
                        field,
                        spec,
                        value_of(source, field),
                        value_of(target, field),
                        config,
                    )
                })
                .collect();

            if fields.is_empty() {
                Outcome::Matched {
                    key: source.key.clone(),
                    source: source.reference,
                    target: target.reference,
                }
            } else {
                Outcome::Mismatched {
                    key: source.key.clone(),
                    source: source.reference,
                    target: target.reference,
                    fields,
                }
            }
        }
        MatchCandidate::SourceOnly(record) => Outcome::MissingInTarget {
            key: record.key.clone(),
            source: record.reference,
        },
        MatchCandidate::TargetOnly(record) => Outcome::MissingInSource {
            key: record.key.clone(),
            target: record.reference,
        },
        MatchCandidate::Duplicate(record) => Outcome::DuplicateKey {
            key: record.key.clone(),
            record: record.reference,
        },
    }
}

/// Classify candidates in order, optionally split across worker threads
///
/// Shards are contiguous slices of the candidate list and their results are
/// concatenated in shard order, so the output order never depends on which
/// shard finishes first.
pub fn classify_sharded(
    candidates: &[MatchCandidate],
    config: &ReconciliationConfig,
    shards: usize,
) -> Vec<Outcome> {
    if shards <= 1 || candidates.len() < 2 {
        return candidates.iter().map(|c| classify(c, config)).collect();
    }

    let shard_len = candidates.len().div_ceil(shards);
    std::thread::scope(|scope| {
        let workers: Vec<_> = candidates
            .chunks(shard_len)
            .map(|shard| {
                scope.spawn(move || {
                    shard
                        .iter()
                        .map(|c| classify(c, config))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        workers
            .into_iter()
            .flat_map(|worker| match worker.join() {
                Ok(outcomes) => outcomes,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}

/// Compare one field of a pair; `None` when the values agree
pub fn compare_field(
    field: &str,
    spec: &ComparedField,
    source: &CanonicalValue,
    target: &CanonicalValue,
    config: &ReconciliationConfig,
) -> Option<FieldDiff> {
    let (equal, delta) = match (source, target) {
        (CanonicalValue::Null, CanonicalValue::Null) => (true, None),
        (CanonicalValue::Number(a), CanonicalValue::Number(b)) => {
            let delta = b - a;
            (numbers_agree(a, b, &spec.tolerance()), Some(delta))
        }
        (CanonicalValue::Date(a), CanonicalValue::Date(b)) => {
            let days = b.signed_duration_since(*a).num_days();
            let equal = match spec.tolerance() {
                Tolerance::Days(window) => days.unsigned_abs() <= u64::from(window),
                _ => days == 0,
            };
            (equal, Some(BigDecimal::from(days)))
        }
        (CanonicalValue::Text(a), CanonicalValue::Text(b)) => {
            let rule = config.rule_for(field);
            (normalize_text(a, rule) == normalize_text(b, rule), None)
        }
        _ => (false, None),
    };

    if equal {
        None
    } else {
        Some(FieldDiff {
            field: field.to_string(),
            source_value: source.clone(),
            target_value: target.clone(),
            delta,
        })
    }
}

/// Whether two numbers agree under a tolerance
///
/// Symmetric in its arguments: only `|a - b|` and `max(|a|, |b|)` are used.
pub fn numbers_agree(a: &BigDecimal, b: &BigDecimal, tolerance: &Tolerance) -> bool {
    let difference = (a - b).abs();
    match tolerance {
        Tolerance::Absolute(limit) => difference <= *limit,
        Tolerance::Relative(percent) => {
            let magnitude = a.abs().max(b.abs());
            difference * BigDecimal::from(100) <= magnitude * percent
        }
        Tolerance::Exact | Tolerance::Days(_) => difference == BigDecimal::from(0),
    }
}

fn value_of<'a>(record: &'a CanonicalRecord, field: &str) -> &'a CanonicalValue {
    const NULL: &CanonicalValue = &CanonicalValue::Null;
    record.values.get(field).unwrap_or(NULL)
}
