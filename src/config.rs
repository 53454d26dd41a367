//! Reconciliation configuration: key fields, compared fields, tolerances,
//! normalization rules and run options.
//!
//! A configuration is supplied once per run and never mutated while the run
//! is in flight. It can be parsed from TOML or assembled with
//! [`ConfigBuilder`]:
//!
//! ```toml
//! key_fields = ["id", "name"]
//! duplicate_policy = "first_with_first"
//!
//! [key_types]
//! id = "numeric"
//!
//! [compared_fields.amount]
//! type = "numeric"
//! tolerance_absolute = "0.10"
//!
//! [compared_fields.date]
//! type = "date"
//! tolerance_days = 1
//!
//! [normalization_rules.name]
//! trim = true
//! case_fold = true
//! ```

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::*;

/// Declared type of a record field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    String,
    Numeric,
    Date,
}

/// How a compared field is declared in configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComparedField {
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    /// Maximum allowed `|a - b|`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance_absolute: Option<BigDecimal>,
    /// Maximum allowed difference as a percentage of the larger magnitude
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance_relative: Option<BigDecimal>,
    /// Maximum allowed distance in days for date fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance_days: Option<u32>,
}

impl ComparedField {
    pub fn string() -> Self {
        Self::default()
    }

    pub fn numeric() -> Self {
        Self {
            field_type: FieldType::Numeric,
            ..Self::default()
        }
    }

    pub fn date() -> Self {
        Self {
            field_type: FieldType::Date,
            ..Self::default()
        }
    }

    pub fn absolute(mut self, tolerance: BigDecimal) -> Self {
        self.tolerance_absolute = Some(tolerance);
        self
    }

    pub fn relative(mut self, percent: BigDecimal) -> Self {
        self.tolerance_relative = Some(percent);
        self
    }

    pub fn within_days(mut self, days: u32) -> Self {
        self.tolerance_days = Some(days);
        self
    }

    /// The tolerance this field is compared under
    pub fn tolerance(&self) -> Tolerance {
        match (&self.tolerance_absolute, &self.tolerance_relative, self.tolerance_days) {
            (Some(abs), _, _) => Tolerance::Absolute(abs.clone()),
            (None, Some(pct), _) => Tolerance::Relative(pct.clone()),
            (None, None, Some(days)) => Tolerance::Days(days),
            (None, None, None) => Tolerance::Exact,
        }
    }
}

/// Resolved comparison tolerance for one field
#[derive(Debug, Clone, PartialEq)]
pub enum Tolerance {
    Exact,
    Absolute(BigDecimal),
    /// Percentage, e.g. `1.5` means 1.5%
    Relative(BigDecimal),
    Days(u32),
}

/// String normalization applied to a field at ingestion and comparison time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationRule {
    #[serde(default = "default_true")]
    pub trim: bool,
    #[serde(default = "default_true")]
    pub case_fold: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NormalizationRule {
    fn default() -> Self {
        Self {
            trim: true,
            case_fold: true,
        }
    }
}

impl NormalizationRule {
    /// Leave the value untouched
    pub fn verbatim() -> Self {
        Self {
            trim: false,
            case_fold: false,
        }
    }

    pub fn apply(&self, value: &str) -> String {
        let value = if self.trim { value.trim() } else { value };
        if self.case_fold {
            value.to_lowercase()
        } else {
            value.to_string()
        }
    }
}

/// What to do when a key occurs more than once on the same side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Pair the first record of each side; every later record is a duplicate
    #[default]
    FirstWithFirst,
    /// Every record under a duplicated key is a duplicate, nothing is paired
    FlagAll,
    /// Fail the run on the first duplicated key
    RejectRun,
}

fn default_date_formats() -> Vec<String> {
    ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y"]
        .iter()
        .map(|f| f.to_string())
        .collect()
}

fn default_progress_interval() -> usize {
    1000
}

fn default_shards() -> usize {
    1
}

/// Complete configuration for one reconciliation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Fields forming the composite match key, in key order
    pub key_fields: Vec<String>,
    /// Types of key fields; unlisted key fields are strings
    #[serde(default)]
    pub key_types: BTreeMap<String, FieldType>,
    /// Value fields compared between paired records
    #[serde(default)]
    pub compared_fields: BTreeMap<String, ComparedField>,
    /// Per-field string normalization
    #[serde(default)]
    pub normalization_rules: BTreeMap<String, NormalizationRule>,
    /// Rule for string fields without an explicit entry
    #[serde(default)]
    pub default_rule: NormalizationRule,
    /// Accepted date formats, tried in order
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    /// Records processed between progress callbacks
    #[serde(default = "default_progress_interval")]
    pub progress_interval: usize,
    /// Independent shards the candidate list is classified in
    #[serde(default = "default_shards")]
    pub classification_shards: usize,
}

impl ReconciliationConfig {
    /// Parse and validate a TOML configuration
    pub fn from_toml(input: &str) -> ReconResult<Self> {
        let config: ReconciliationConfig =
            toml::from_str(input).map_err(|e| ReconError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Type of a key field
    pub fn key_type(&self, field: &str) -> FieldType {
        self.key_types.get(field).copied().unwrap_or_default()
    }

    /// Normalization rule in force for a field
    pub fn rule_for(&self, field: &str) -> NormalizationRule {
        self.normalization_rules
            .get(field)
            .copied()
            .unwrap_or(self.default_rule)
    }

    /// Check the configuration for internal consistency
    pub fn validate(&self) -> ReconResult<()> {
        if self.key_fields.is_empty() {
            return Err(ReconError::Configuration(
                "At least one key field is required".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for field in &self.key_fields {
            crate::utils::validate_field_name(field)?;
            if !seen.insert(field.as_str()) {
                return Err(ReconError::Configuration(format!(
                    "Key field '{}' is listed more than once",
                    field
                )));
            }
        }

        for field in self.key_types.keys() {
            if !seen.contains(field.as_str()) {
                return Err(ReconError::Configuration(format!(
                    "Key type declared for '{}', which is not a key field",
                    field
                )));
            }
        }

        for (field, spec) in &self.compared_fields {
            crate::utils::validate_field_name(field)?;
            if seen.contains(field.as_str()) {
                return Err(ReconError::Configuration(format!(
                    "Field '{}' cannot be both a key and a compared field",
                    field
                )));
            }
            crate::utils::validate_compared_field(field, spec)?;
        }

        for field in self.normalization_rules.keys() {
            crate::utils::validate_field_name(field)?;
        }

        let uses_dates = self
            .key_fields
            .iter()
            .any(|f| self.key_type(f) == FieldType::Date)
            || self
                .compared_fields
                .values()
                .any(|c| c.field_type == FieldType::Date);
        if uses_dates && self.date_formats.is_empty() {
            return Err(ReconError::Configuration(
                "Date fields are configured but no date formats are accepted".to_string(),
            ));
        }

        if self.progress_interval == 0 {
            return Err(ReconError::Configuration(
                "Progress interval must be greater than zero".to_string(),
            ));
        }

        if self.classification_shards == 0 {
            return Err(ReconError::Configuration(
                "Classification shards must be at least one".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for assembling a configuration in code
pub struct ConfigBuilder {
    config: ReconciliationConfig,
}

impl ConfigBuilder {
    /// Start from a list of key fields
    pub fn new<I, S>(key_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            config: ReconciliationConfig {
                key_fields: key_fields.into_iter().map(Into::into).collect(),
                key_types: BTreeMap::new(),
                compared_fields: BTreeMap::new(),
                normalization_rules: BTreeMap::new(),
                default_rule: NormalizationRule::default(),
                date_formats: default_date_formats(),
                duplicate_policy: DuplicatePolicy::default(),
                progress_interval: default_progress_interval(),
                classification_shards: default_shards(),
            },
        }
    }

    /// Declare the type of a key field
    pub fn key_type(mut self, field: impl Into<String>, field_type: FieldType) -> Self {
        self.config.key_types.insert(field.into(), field_type);
        self
    }

    /// Add a compared field
    pub fn compare(mut self, field: impl Into<String>, spec: ComparedField) -> Self {
        self.config.compared_fields.insert(field.into(), spec);
        self
    }

    /// Set a field-specific normalization rule
    pub fn rule(mut self, field: impl Into<String>, rule: NormalizationRule) -> Self {
        self.config.normalization_rules.insert(field.into(), rule);
        self
    }

    pub fn default_rule(mut self, rule: NormalizationRule) -> Self {
        self.config.default_rule = rule;
        self
    }

    pub fn date_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.date_formats = formats.into_iter().map(Into::into).collect();
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.config.duplicate_policy = policy;
        self
    }

    pub fn progress_interval(mut self, interval: usize) -> Self {
        self.config.progress_interval = interval;
        self
    }

    pub fn classification_shards(mut self, shards: usize) -> Self {
        self.config.classification_shards = shards;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> ReconResult<ReconciliationConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_from_toml() {
        let config = ReconciliationConfig::from_toml(
            r#"
            key_fields = ["id", "name"]
            duplicate_policy = "flag_all"

            [key_types]
            id = "numeric"

            [compared_fields.amount]
            type = "numeric"
            tolerance_absolute = "0.10"

            [compared_fields.date]
            type = "date"
            tolerance_days = 2

            [normalization_rules.name]
            trim = true
            case_fold = false
            "#,
        )
        .unwrap();

        assert_eq!(config.key_fields, vec!["id", "name"]);
        assert_eq!(config.key_type("id"), FieldType::Numeric);
        assert_eq!(config.key_type("name"), FieldType::String);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::FlagAll);
        assert_eq!(
            config.compared_fields["amount"].tolerance(),
            Tolerance::Absolute(BigDecimal::from_str("0.10").unwrap())
        );
        assert_eq!(config.compared_fields["date"].tolerance(), Tolerance::Days(2));
        assert!(!config.rule_for("name").case_fold);
        assert!(config.rule_for("memo").case_fold);
        assert_eq!(config.progress_interval, 1000);
        assert_eq!(config.classification_shards, 1);
    }

    #[test]
    fn test_rejects_unparseable_toml() {
        let result = ReconciliationConfig::from_toml("key_fields = ");
        assert!(matches!(result, Err(ReconError::Configuration(_))));
    }

    #[test]
    fn test_requires_key_fields() {
        let result = ConfigBuilder::new(Vec::<String>::new()).build();
        assert!(matches!(result, Err(ReconError::Configuration(_))));
    }

    #[test]
    fn test_rejects_duplicate_key_field() {
        let result = ConfigBuilder::new(["id", "id"]).build();
        assert!(matches!(result, Err(ReconError::Configuration(_))));
    }

    #[test]
    fn test_rejects_key_and_compared_overlap() {
        let result = ConfigBuilder::new(["id"])
            .compare("id", ComparedField::numeric())
            .build();
        assert!(matches!(result, Err(ReconError::Configuration(_))));
    }

    #[test]
    fn test_rejects_both_tolerance_modes() {
        let result = ConfigBuilder::new(["id"])
            .compare(
                "amount",
                ComparedField::numeric()
                    .absolute(BigDecimal::from(1))
                    .relative(BigDecimal::from(2)),
            )
            .build();
        assert!(matches!(result, Err(ReconError::Configuration(_))));
    }

    #[test]
    fn test_rejects_numeric_tolerance_on_string() {
        let result = ConfigBuilder::new(["id"])
            .compare("memo", ComparedField::string().absolute(BigDecimal::from(1)))
            .build();
        assert!(matches!(result, Err(ReconError::Configuration(_))));
    }

    #[test]
    fn test_rejects_zero_progress_interval() {
        let result = ConfigBuilder::new(["id"]).progress_interval(0).build();
        assert!(matches!(result, Err(ReconError::Configuration(_))));
    }

    #[test]
    fn test_rejects_key_type_for_unknown_key() {
        let result = ConfigBuilder::new(["id"])
            .key_type("reference", FieldType::Numeric)
            .build();
        assert!(matches!(result, Err(ReconError::Configuration(_))));
    }

    #[test]
    fn test_normalization_rule_apply() {
        assert_eq!(NormalizationRule::default().apply("  ACME Ltd "), "acme ltd");
        assert_eq!(NormalizationRule::verbatim().apply("  ACME "), "  ACME ");
        let trim_only = NormalizationRule {
            trim: true,
            case_fold: false,
        };
        assert_eq!(trim_only.apply(" ACME "), "ACME");
    }
}
