//! Key-based pairing of source and target records

use std::collections::HashMap;

use crate::config::DuplicatePolicy;
use crate::types::*;

/// A pairing decision for one or two canonical records
#[derive(Debug, Clone, PartialEq)]
pub enum MatchCandidate {
    /// Source and target share a key
    Pair {
        source: CanonicalRecord,
        target: CanonicalRecord,
    },
    /// Key present only in the source ledger
    SourceOnly(CanonicalRecord),
    /// Key present only in the target ledger
    TargetOnly(CanonicalRecord),
    /// Extra record under a key that occurs more than once on its side
    Duplicate(CanonicalRecord),
}

impl MatchCandidate {
    pub fn key(&self) -> &MatchKey {
        match self {
            MatchCandidate::Pair { source, .. } => &source.key,
            MatchCandidate::SourceOnly(record)
            | MatchCandidate::TargetOnly(record)
            | MatchCandidate::Duplicate(record) => &record.key,
        }
    }
}

/// Result of matching two canonical ledgers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutput {
    /// Candidates in key-encounter order
    pub candidates: Vec<MatchCandidate>,
    /// Keys seen more than once on either side, in encounter order
    pub duplicates: Vec<MatchKey>,
}

#[derive(Default)]
struct KeyGroup {
    source: Vec<CanonicalRecord>,
    target: Vec<CanonicalRecord>,
}

/// Pair source records with target records by match key
///
/// Keys are grouped with a hash index, so the cost is linear in the number
/// of records. Output follows the order in which keys are first seen in the
/// source ledger, then target-only keys in target order. Within one key the
/// paired (or singleton) candidate comes first, followed by extra source
/// records and then extra target records, each in ingestion order.
pub fn match_records(
    source: Vec<CanonicalRecord>,
    target: Vec<CanonicalRecord>,
    policy: DuplicatePolicy,
) -> ReconResult<MatchOutput> {
    let mut index: HashMap<MatchKey, usize> = HashMap::new();
    let mut groups: Vec<(MatchKey, KeyGroup)> = Vec::new();

    for (side, records) in [(Side::Source, source), (Side::Target, target)] {
        for record in records {
            let slot = *index.entry(record.key.clone()).or_insert_with(|| {
                groups.push((record.key.clone(), KeyGroup::default()));
                groups.len() - 1
            });
            let group = &mut groups[slot].1;
            match side {
                Side::Source => group.source.push(record),
                Side::Target => group.target.push(record),
            }
        }
    }

    let mut output = MatchOutput {
        candidates: Vec::with_capacity(groups.len()),
        duplicates: Vec::new(),
    };

    for (key, group) in groups {
        let duplicated_side = if group.source.len() > 1 {
            Some(Side::Source)
        } else if group.target.len() > 1 {
            Some(Side::Target)
        } else {
            None
        };

        if let Some(side) = duplicated_side {
            tracing::warn!(
                %key,
                source_records = group.source.len(),
                target_records = group.target.len(),
                "duplicate match key"
            );
            if policy == DuplicatePolicy::RejectRun {
                return Err(ReconError::DuplicateKey { key, side });
            }
            output.duplicates.push(key);
        }

        if duplicated_side.is_some() && policy == DuplicatePolicy::FlagAll {
            output.candidates.extend(
                group
                    .source
                    .into_iter()
                    .chain(group.target)
                    .map(MatchCandidate::Duplicate),
            );
            continue;
        }

        let mut source_iter = group.source.into_iter();
        let mut target_iter = group.target.into_iter();
        let head = match (source_iter.next(), target_iter.next()) {
            (Some(source), Some(target)) => MatchCandidate::Pair { source, target },
            (Some(source), None) => MatchCandidate::SourceOnly(source),
            (None, Some(target)) => MatchCandidate::TargetOnly(target),
            (None, None) => continue,
        };
        output.candidates.push(head);
        output
            .candidates
            .extend(source_iter.chain(target_iter).map(MatchCandidate::Duplicate));
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(side: Side, position: usize, key: &str) -> CanonicalRecord {
        CanonicalRecord {
            reference: RecordRef::new(side, position),
            key: MatchKey::new(vec![key.to_string()]),
            values: BTreeMap::new(),
        }
    }

    fn refs(candidate: &MatchCandidate) -> Vec<RecordRef> {
        match candidate {
            MatchCandidate::Pair { source, target } => vec![source.reference, target.reference],
            MatchCandidate::SourceOnly(r)
            | MatchCandidate::TargetOnly(r)
            | MatchCandidate::Duplicate(r) => vec![r.reference],
        }
    }

    #[test]
    fn test_pairs_and_singletons_in_encounter_order() {
        let source = vec![
            record(Side::Source, 0, "b"),
            record(Side::Source, 1, "a"),
            record(Side::Source, 2, "c"),
        ];
        let target = vec![
            record(Side::Target, 0, "d"),
            record(Side::Target, 1, "a"),
            record(Side::Target, 2, "b"),
        ];

        let output = match_records(source, target, DuplicatePolicy::FirstWithFirst).unwrap();
        let keys: Vec<String> = output.candidates.iter().map(|c| c.key().to_string()).collect();
        assert_eq!(keys, vec!["b", "a", "c", "d"]);
        assert!(matches!(output.candidates[0], MatchCandidate::Pair { .. }));
        assert!(matches!(output.candidates[2], MatchCandidate::SourceOnly(_)));
        assert!(matches!(output.candidates[3], MatchCandidate::TargetOnly(_)));
        assert!(output.duplicates.is_empty());
    }

    #[test]
    fn test_first_with_first_flags_extras() {
        let source = vec![record(Side::Source, 0, "1"), record(Side::Source, 1, "1")];
        let target = vec![
            record(Side::Target, 0, "1"),
            record(Side::Target, 1, "1"),
            record(Side::Target, 2, "1"),
        ];

        let output = match_records(source, target, DuplicatePolicy::FirstWithFirst).unwrap();
        assert_eq!(output.candidates.len(), 4);
        assert_eq!(
            refs(&output.candidates[0]),
            vec![RecordRef::new(Side::Source, 0), RecordRef::new(Side::Target, 0)]
        );
        assert_eq!(refs(&output.candidates[1]), vec![RecordRef::new(Side::Source, 1)]);
        assert_eq!(refs(&output.candidates[2]), vec![RecordRef::new(Side::Target, 1)]);
        assert_eq!(refs(&output.candidates[3]), vec![RecordRef::new(Side::Target, 2)]);
        assert!(output.candidates[1..]
            .iter()
            .all(|c| matches!(c, MatchCandidate::Duplicate(_))));
        assert_eq!(output.duplicates, vec![MatchKey::new(vec!["1".to_string()])]);
    }

    #[test]
    fn test_duplicates_on_one_side_only() {
        let source = vec![record(Side::Source, 0, "x"), record(Side::Source, 1, "x")];
        let output = match_records(source, Vec::new(), DuplicatePolicy::FirstWithFirst).unwrap();
        assert!(matches!(output.candidates[0], MatchCandidate::SourceOnly(_)));
        assert!(matches!(output.candidates[1], MatchCandidate::Duplicate(_)));
    }

    #[test]
    fn test_flag_all_pairs_nothing() {
        let source = vec![record(Side::Source, 0, "1"), record(Side::Source, 1, "1")];
        let target = vec![record(Side::Target, 0, "1"), record(Side::Target, 1, "2")];

        let output = match_records(source, target, DuplicatePolicy::FlagAll).unwrap();
        assert_eq!(output.candidates.len(), 4);
        assert!(output.candidates[..3]
            .iter()
            .all(|c| matches!(c, MatchCandidate::Duplicate(_))));
        assert!(matches!(output.candidates[3], MatchCandidate::TargetOnly(_)));
    }

    #[test]
    fn test_reject_run_fails_on_duplicate() {
        let target = vec![record(Side::Target, 0, "9"), record(Side::Target, 1, "9")];
        let err = match_records(Vec::new(), target, DuplicatePolicy::RejectRun).unwrap_err();
        assert_eq!(
            err,
            ReconError::DuplicateKey {
                key: MatchKey::new(vec!["9".to_string()]),
                side: Side::Target
            }
        );
    }

    #[test]
    fn test_every_record_in_exactly_one_candidate() {
        let source: Vec<_> = (0..50)
            .map(|i| record(Side::Source, i, &(i % 7).to_string()))
            .collect();
        let target: Vec<_> = (0..40)
            .map(|i| record(Side::Target, i, &(i % 11).to_string()))
            .collect();

        let output = match_records(source, target, DuplicatePolicy::FirstWithFirst).unwrap();
        let mut all: Vec<RecordRef> = output.candidates.iter().flat_map(refs).collect();
        all.sort();
        let before = all.len();
        all.dedup();
        assert_eq!(before, all.len());
        assert_eq!(all.len(), 90);
    }
}
