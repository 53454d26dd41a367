//! Record normalization: raw ledger rows into canonical, comparable records

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::config::{FieldType, NormalizationRule, ReconciliationConfig};
use crate::types::*;

/// Canonical records of one ledger plus the rows that could not be normalized
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedLedger {
    pub records: Vec<CanonicalRecord>,
    pub rejected: Vec<RejectedRecord>,
}

/// Convert one raw record into canonical form
///
/// Fails when a key field is missing, blank, or cannot be coerced to its
/// declared type, or when a compared field cannot be coerced. Compared
/// fields that are absent or blank become [`CanonicalValue::Null`].
pub fn normalize(
    raw: &RawRecord,
    reference: RecordRef,
    config: &ReconciliationConfig,
) -> Result<CanonicalRecord, NormalizationError> {
    let mut parts = Vec::with_capacity(config.key_fields.len());
    for field in &config.key_fields {
        let value = raw
            .get(field)
            .ok_or_else(|| NormalizationError::MissingKeyField {
                field: field.clone(),
            })?;
        let canonical = coerce(
            field,
            value,
            config.key_type(field),
            config.rule_for(field),
            config,
        )?;
        let part = match canonical {
            CanonicalValue::Null => {
                return Err(match value {
                    RawValue::Null => NormalizationError::MissingKeyField {
                        field: field.clone(),
                    },
                    _ => NormalizationError::EmptyKeyField {
                        field: field.clone(),
                    },
                })
            }
            CanonicalValue::Text(s) => s,
            CanonicalValue::Number(n) => n.normalized().to_string(),
            CanonicalValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        };
        parts.push(part);
    }

    let mut values = BTreeMap::new();
    for (field, spec) in &config.compared_fields {
        let canonical = match raw.get(field) {
            Some(value) => coerce(field, value, spec.field_type, config.rule_for(field), config)?,
            None => CanonicalValue::Null,
        };
        values.insert(field.clone(), canonical);
    }

    Ok(CanonicalRecord {
        reference,
        key: MatchKey::new(parts),
        values,
    })
}

/// Normalize a whole ledger in ingestion order
///
/// `on_progress` is called with the number of records processed so far
/// every `progress_interval` records.
pub fn normalize_ledger(
    records: &[RawRecord],
    side: Side,
    config: &ReconciliationConfig,
    mut on_progress: impl FnMut(usize),
) -> NormalizedLedger {
    let mut ledger = NormalizedLedger {
        records: Vec::with_capacity(records.len()),
        rejected: Vec::new(),
    };

    for (position, raw) in records.iter().enumerate() {
        let reference = RecordRef::new(side, position);
        match normalize(raw, reference, config) {
            Ok(record) => ledger.records.push(record),
            Err(error) => {
                tracing::warn!(record = %reference, %error, "record rejected during normalization");
                ledger.rejected.push(RejectedRecord {
                    record: reference,
                    error,
                });
            }
        }

        let processed = position + 1;
        if processed % config.progress_interval == 0 {
            on_progress(processed);
        }
    }

    ledger
}

/// Normalize string content under a rule, the same way at ingestion and
/// comparison time
pub fn normalize_text(value: &str, rule: NormalizationRule) -> Option<String> {
    let normalized = rule.apply(value);
    if normalized.trim().is_empty() {
        None
    } else {
        Some(normalized)
    }
}

fn coerce(
    field: &str,
    value: &RawValue,
    field_type: FieldType,
    rule: NormalizationRule,
    config: &ReconciliationConfig,
) -> Result<CanonicalValue, NormalizationError> {
    match (field_type, value) {
        (_, RawValue::Null) => Ok(CanonicalValue::Null),
        (FieldType::String, RawValue::Text(s)) => {
            Ok(normalize_text(s, rule).map_or(CanonicalValue::Null, CanonicalValue::Text))
        }
        (FieldType::String | FieldType::Numeric, RawValue::Number(n)) if !within_scale(n) => {
            let (digits, scale) = n.as_bigint_and_exponent();
            Err(NormalizationError::InvalidNumber {
                field: field.to_string(),
                value: format!("{digits}e{}", -scale),
            })
        }
        (FieldType::String, RawValue::Number(n)) => Ok(CanonicalValue::Text(n.to_string())),
        (FieldType::Numeric, RawValue::Number(n)) => Ok(CanonicalValue::Number(n.clone())),
        (FieldType::Numeric, RawValue::Text(s)) => {
            if s.trim().is_empty() {
                return Ok(CanonicalValue::Null);
            }
            parse_number(s)
                .map(CanonicalValue::Number)
                .ok_or_else(|| NormalizationError::InvalidNumber {
                    field: field.to_string(),
                    value: s.clone(),
                })
        }
        (FieldType::Date, RawValue::Text(s)) => {
            if s.trim().is_empty() {
                return Ok(CanonicalValue::Null);
            }
            parse_date(s, &config.date_formats)
                .map(CanonicalValue::Date)
                .ok_or_else(|| NormalizationError::InvalidDate {
                    field: field.to_string(),
                    value: s.clone(),
                })
        }
        (FieldType::Date, RawValue::Number(n)) => Err(NormalizationError::InvalidDate {
            field: field.to_string(),
            value: n.to_string(),
        }),
    }
}

/// Largest decimal exponent accepted in either direction
const MAX_SCALE: i64 = 64;

fn within_scale(value: &BigDecimal) -> bool {
    let (_, scale) = value.as_bigint_and_exponent();
    scale.abs() <= MAX_SCALE
}

/// Parse a decimal number, accepting `,` as a thousands separator
///
/// Exponents beyond 64 places either way are refused; subtracting such a
/// value from an ordinary amount would expand it to millions of digits.
pub fn parse_number(value: &str) -> Option<BigDecimal> {
    let cleaned: String = value.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    BigDecimal::from_str(&cleaned).ok().filter(within_scale)
}

/// Parse a date with the first matching format, falling back to RFC 3339
pub fn parse_date(value: &str, formats: &[String]) -> Option<NaiveDate> {
    let value = value.trim();
    formats
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.date_naive())
        })
}
