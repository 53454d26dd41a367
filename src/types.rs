//! Core types and data structures for the reconciliation engine

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Which ledger a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The ledger being reconciled (e.g. the internal books)
    Source,
    /// The ledger it is reconciled against (e.g. a bank statement)
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Target => write!(f, "target"),
        }
    }
}

/// A single cell of a raw record as supplied by ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Text(String),
    Number(BigDecimal),
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<BigDecimal> for RawValue {
    fn from(value: BigDecimal) -> Self {
        RawValue::Number(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Number(BigDecimal::from(value))
    }
}

/// Opaque field-name to value mapping for one ingested record
///
/// Immutable once handed to the engine. Fields are kept in a sorted map so
/// every downstream encoding of a record is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: BTreeMap<String, RawValue>,
}

impl RawRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter
    pub fn with(mut self, field: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Get a field value by name
    pub fn get(&self, field: &str) -> Option<&RawValue> {
        self.fields.get(field)
    }

    /// All fields in name order
    pub fn fields(&self) -> &BTreeMap<String, RawValue> {
        &self.fields
    }
}

impl<K: Into<String>, V: Into<RawValue>> FromIterator<(K, V)> for RawRecord {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Position of a record within its ledger's ingestion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordRef {
    pub side: Side,
    pub position: usize,
}

impl RecordRef {
    pub fn new(side: Side, position: usize) -> Self {
        Self { side, position }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.side, self.position)
    }
}

/// Normalized composite key used to pair records across ledgers
///
/// One part per configured key field, in configuration order. Equality is
/// exact; all fuzziness is removed during normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchKey(Vec<String>);

impl MatchKey {
    pub fn new(parts: Vec<String>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("|"))
    }
}

/// A compared field value after normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CanonicalValue {
    /// Field absent or blank in the raw record
    Null,
    Text(String),
    Number(BigDecimal),
    Date(NaiveDate),
}

impl fmt::Display for CanonicalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalValue::Null => write!(f, "null"),
            CanonicalValue::Text(s) => write!(f, "{s}"),
            CanonicalValue::Number(n) => write!(f, "{n}"),
            CanonicalValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// A record in comparable form, owned by the run that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Where the record came from
    pub reference: RecordRef,
    /// Derived composite key
    pub key: MatchKey,
    /// Compared fields, by name
    pub values: BTreeMap<String, CanonicalValue>,
}

/// One field that failed comparison within a matched pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub source_value: CanonicalValue,
    pub target_value: CanonicalValue,
    /// `target - source` for numeric fields, signed day count for dates
    pub delta: Option<BigDecimal>,
}

/// Result of classifying one match candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Matched {
        key: MatchKey,
        source: RecordRef,
        target: RecordRef,
    },
    Mismatched {
        key: MatchKey,
        source: RecordRef,
        target: RecordRef,
        fields: Vec<FieldDiff>,
    },
    MissingInTarget {
        key: MatchKey,
        source: RecordRef,
    },
    MissingInSource {
        key: MatchKey,
        target: RecordRef,
    },
    DuplicateKey {
        key: MatchKey,
        record: RecordRef,
    },
}

/// Discriminant of an [`Outcome`], used for counting and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Matched,
    Mismatched,
    MissingInTarget,
    MissingInSource,
    DuplicateKey,
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Matched { .. } => OutcomeKind::Matched,
            Outcome::Mismatched { .. } => OutcomeKind::Mismatched,
            Outcome::MissingInTarget { .. } => OutcomeKind::MissingInTarget,
            Outcome::MissingInSource { .. } => OutcomeKind::MissingInSource,
            Outcome::DuplicateKey { .. } => OutcomeKind::DuplicateKey,
        }
    }

    pub fn key(&self) -> &MatchKey {
        match self {
            Outcome::Matched { key, .. }
            | Outcome::Mismatched { key, .. }
            | Outcome::MissingInTarget { key, .. }
            | Outcome::MissingInSource { key, .. }
            | Outcome::DuplicateKey { key, .. } => key,
        }
    }

    /// Every record this outcome accounts for
    pub fn records(&self) -> Vec<RecordRef> {
        match self {
            Outcome::Matched { source, target, .. }
            | Outcome::Mismatched { source, target, .. } => vec![*source, *target],
            Outcome::MissingInTarget { source, .. } => vec![*source],
            Outcome::MissingInSource { target, .. } => vec![*target],
            Outcome::DuplicateKey { record, .. } => vec![*record],
        }
    }
}

/// Per-record failure to reach canonical form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum NormalizationError {
    #[error("Missing key field '{field}'")]
    MissingKeyField { field: String },
    #[error("Key field '{field}' is empty after normalization")]
    EmptyKeyField { field: String },
    #[error("Field '{field}' is not a number: '{value}'")]
    InvalidNumber { field: String, value: String },
    #[error("Field '{field}' is not a recognized date: '{value}'")]
    InvalidDate { field: String, value: String },
}

/// A raw record excluded from matching, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub record: RecordRef,
    pub error: NormalizationError,
}

/// Identifier of a persisted report
pub type ReportId = Uuid;

/// Errors that abort a reconciliation run
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum ReconError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Ingestion failure on {side} side: {message}")]
    Ingestion { side: Side, message: String },
    #[error("Run {0} was cancelled")]
    Cancelled(Uuid),
    #[error("Malformed outcome: {0}")]
    MalformedOutcome(String),
    #[error("Duplicate key '{key}' on {side} side")]
    DuplicateKey { key: MatchKey, side: Side },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Report not found: {0}")]
    ReportNotFound(ReportId),
    #[error("Invalid run state: {0}")]
    InvalidRunState(String),
    #[error("Input snapshot for run {0} changed since it completed")]
    SnapshotChanged(Uuid),
    #[error(transparent)]
    Normalization(#[from] NormalizationError),
}

/// Result type for reconciliation operations
pub type ReconResult<T> = Result<T, ReconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_records() {
        let key = MatchKey::new(vec!["1".to_string()]);
        let matched = Outcome::Matched {
            key: key.clone(),
            source: RecordRef::new(Side::Source, 0),
            target: RecordRef::new(Side::Target, 4),
        };
        assert_eq!(matched.kind(), OutcomeKind::Matched);
        assert_eq!(matched.records().len(), 2);

        let dup = Outcome::DuplicateKey {
            key,
            record: RecordRef::new(Side::Target, 2),
        };
        assert_eq!(dup.records(), vec![RecordRef::new(Side::Target, 2)]);
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = Outcome::MissingInTarget {
            key: MatchKey::new(vec!["7".to_string(), "acme".to_string()]),
            source: RecordRef::new(Side::Source, 1),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"status\":\"MISSING_IN_TARGET\""));
        assert!(json.contains("[\"7\",\"acme\"]"));
    }

    #[test]
    fn test_raw_record_builder() {
        let record = RawRecord::new().with("id", 1).with("name", "Acme");
        assert_eq!(record.get("id"), Some(&RawValue::Number(BigDecimal::from(1))));
        assert_eq!(record.get("name"), Some(&RawValue::from("Acme")));
        assert!(record.get("amount").is_none());
    }

    #[test]
    fn test_match_key_display() {
        let key = MatchKey::new(vec!["1".to_string(), "acme".to_string()]);
        assert_eq!(key.to_string(), "1|acme");
        assert_eq!(RecordRef::new(Side::Target, 3).to_string(), "target#3");
    }
}
