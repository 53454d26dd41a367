//! Property tests for matching, classification and report aggregation

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use ledger_recon::reconciliation::classifier::{compare_field, numbers_agree};
use ledger_recon::{
    classify, match_records, normalize_ledger, CanonicalValue, ComparedField, ConfigBuilder,
    DuplicatePolicy, FieldType, MatchKey, Outcome, RawRecord, ReconciliationConfig,
    ReconciliationReport, ReportBuilder, RunMetadata, Side, Tolerance,
};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

fn cents(value: i64) -> BigDecimal {
    BigDecimal::from(value) / BigDecimal::from(100)
}

fn config(policy: DuplicatePolicy) -> ReconciliationConfig {
    ConfigBuilder::new(["id"])
        .key_type("id", FieldType::Numeric)
        .compare("amt", ComparedField::numeric().absolute(cents(50)))
        .duplicate_policy(policy)
        .build()
        .unwrap()
}

/// Small key space so duplicates and one-sided keys are common
fn ledger() -> impl Strategy<Value = Vec<RawRecord>> {
    prop::collection::vec((0i64..8, -5_000i64..5_000, 0u8..10), 0..24).prop_map(|rows| {
        rows.into_iter()
            .map(|(id, amount, roll)| {
                let amt = if roll == 0 {
                    "n/a".to_string()
                } else {
                    cents(amount).to_string()
                };
                RawRecord::new().with("id", id).with("amt", amt)
            })
            .collect()
    })
}

fn policy() -> impl Strategy<Value = DuplicatePolicy> {
    prop_oneof![
        Just(DuplicatePolicy::FirstWithFirst),
        Just(DuplicatePolicy::FlagAll),
    ]
}

fn tolerance() -> impl Strategy<Value = Tolerance> {
    prop_oneof![
        Just(Tolerance::Exact),
        (0i64..1_000).prop_map(|c| Tolerance::Absolute(cents(c))),
        (0i64..25).prop_map(|p| Tolerance::Relative(BigDecimal::from(p))),
    ]
}

fn reconcile(
    source: &[RawRecord],
    target: &[RawRecord],
    config: &ReconciliationConfig,
) -> ReconciliationReport {
    let source_ledger = normalize_ledger(source, Side::Source, config, |_| {});
    let target_ledger = normalize_ledger(target, Side::Target, config, |_| {});
    let mut rejected = source_ledger.rejected;
    rejected.extend(target_ledger.rejected);

    let matched = match_records(
        source_ledger.records,
        target_ledger.records,
        config.duplicate_policy,
    )
    .unwrap();
    let outcomes = matched
        .candidates
        .iter()
        .map(|candidate| classify(candidate, config))
        .collect();

    ReportBuilder::new(RunMetadata {
        run_id: Uuid::nil(),
        as_of: NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
        source_records: source.len(),
        target_records: target.len(),
        input_fingerprint: String::new(),
        engine_version: "test".to_string(),
    })
    .rejected(rejected)
    .duplicate_keys(matched.duplicates)
    .build(outcomes)
    .unwrap()
}

fn paired_key(outcome: &Outcome) -> Option<(&MatchKey, usize)> {
    match outcome {
        Outcome::Matched { key, source, .. } | Outcome::Mismatched { key, source, .. } => {
            Some((key, source.position))
        }
        _ => None,
    }
}

proptest! {
    #[test]
    fn prop_every_record_accounted_once(
        source in ledger(),
        target in ledger(),
        policy in policy(),
    ) {
        let report = reconcile(&source, &target, &config(policy));

        let accounted: usize = report.outcomes.iter().map(|o| o.records().len()).sum();
        prop_assert_eq!(accounted + report.rejected.len(), source.len() + target.len());

        let summary = &report.summary;
        let counted = summary.matched * 2
            + summary.mismatched * 2
            + summary.missing_in_target
            + summary.missing_in_source
            + summary.duplicates
            + summary.rejected_source
            + summary.rejected_target;
        prop_assert_eq!(counted, source.len() + target.len());
    }

    #[test]
    fn prop_flagged_duplicates_are_never_paired(source in ledger(), target in ledger()) {
        let report = reconcile(&source, &target, &config(DuplicatePolicy::FlagAll));
        let duplicated: HashSet<&MatchKey> = report.duplicate_keys.iter().collect();

        for outcome in &report.outcomes {
            if let Some((key, _)) = paired_key(outcome) {
                prop_assert!(!duplicated.contains(key), "paired duplicated key {}", key);
            }
        }
    }

    #[test]
    fn prop_first_records_are_paired(source in ledger(), target in ledger()) {
        let report = reconcile(&source, &target, &config(DuplicatePolicy::FirstWithFirst));

        // first accepted source position for every key
        let mut first: BTreeMap<&MatchKey, usize> = BTreeMap::new();
        for outcome in &report.outcomes {
            for record in outcome.records() {
                if record.side == Side::Source {
                    let position = first.entry(outcome.key()).or_insert(record.position);
                    *position = (*position).min(record.position);
                }
            }
        }
        for outcome in &report.outcomes {
            if let Some((key, position)) = paired_key(outcome) {
                prop_assert_eq!(first.get(key), Some(&position));
            }
        }
    }

    #[test]
    fn prop_numeric_tolerance_is_symmetric(
        a in -100_000i64..100_000,
        b in -100_000i64..100_000,
        tolerance in tolerance(),
    ) {
        let (a, b) = (cents(a), cents(b));
        prop_assert_eq!(numbers_agree(&a, &b, &tolerance), numbers_agree(&b, &a, &tolerance));
    }

    #[test]
    fn prop_field_deltas_flip_with_sides(
        a in -100_000i64..100_000,
        b in -100_000i64..100_000,
    ) {
        let config = config(DuplicatePolicy::FirstWithFirst);
        let spec = &config.compared_fields["amt"];
        let (a, b) = (CanonicalValue::Number(cents(a)), CanonicalValue::Number(cents(b)));

        let forward = compare_field("amt", spec, &a, &b, &config);
        let backward = compare_field("amt", spec, &b, &a, &config);
        prop_assert_eq!(forward.is_some(), backward.is_some());
        if let (Some(forward), Some(backward)) = (forward, backward) {
            let forward = forward.delta.unwrap();
            let backward = backward.delta.unwrap();
            prop_assert_eq!(forward, -backward);
        }
    }
}
