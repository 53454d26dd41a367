//! Validation utilities

use bigdecimal::BigDecimal;

use crate::config::{ComparedField, FieldType};
use crate::types::*;

/// Validate that a configured field name is usable
pub fn validate_field_name(field: &str) -> ReconResult<()> {
    if field.trim().is_empty() {
        return Err(ReconError::Configuration(
            "Field name cannot be empty".to_string(),
        ));
    }

    if field.len() > 100 {
        return Err(ReconError::Configuration(format!(
            "Field name '{}' cannot exceed 100 characters",
            field
        )));
    }

    if field.trim() != field {
        return Err(ReconError::Configuration(format!(
            "Field name '{}' has leading or trailing whitespace",
            field
        )));
    }

    Ok(())
}

/// Validate that a tolerance is not negative
pub fn validate_non_negative(field: &str, tolerance: &BigDecimal) -> ReconResult<()> {
    if *tolerance < BigDecimal::from(0) {
        Err(ReconError::Configuration(format!(
            "Tolerance for '{}' must not be negative",
            field
        )))
    } else {
        Ok(())
    }
}

/// Validate the tolerance settings of a compared field against its type
pub fn validate_compared_field(field: &str, spec: &ComparedField) -> ReconResult<()> {
    if spec.tolerance_absolute.is_some() && spec.tolerance_relative.is_some() {
        return Err(ReconError::Configuration(format!(
            "Field '{}' sets both an absolute and a relative tolerance",
            field
        )));
    }

    if let Some(ref tolerance) = spec.tolerance_absolute {
        validate_non_negative(field, tolerance)?;
    }
    if let Some(ref tolerance) = spec.tolerance_relative {
        validate_non_negative(field, tolerance)?;
    }

    match spec.field_type {
        FieldType::Numeric => {
            if spec.tolerance_days.is_some() {
                return Err(ReconError::Configuration(format!(
                    "Numeric field '{}' cannot use a day tolerance",
                    field
                )));
            }
        }
        FieldType::Date => {
            if spec.tolerance_absolute.is_some() || spec.tolerance_relative.is_some() {
                return Err(ReconError::Configuration(format!(
                    "Date field '{}' only supports a day tolerance",
                    field
                )));
            }
        }
        FieldType::String => {
            if spec.tolerance_absolute.is_some()
                || spec.tolerance_relative.is_some()
                || spec.tolerance_days.is_some()
            {
                return Err(ReconError::Configuration(format!(
                    "String field '{}' cannot have a tolerance",
                    field
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names() {
        assert!(validate_field_name("amount").is_ok());
        assert!(validate_field_name("").is_err());
        assert!(validate_field_name("   ").is_err());
        assert!(validate_field_name(" amount").is_err());
        assert!(validate_field_name(&"x".repeat(101)).is_err());
    }

    #[test]
    fn test_negative_tolerance() {
        let spec = ComparedField::numeric().absolute(BigDecimal::from(-1));
        assert!(validate_compared_field("amount", &spec).is_err());
    }

    #[test]
    fn test_date_tolerance_on_numeric() {
        let spec = ComparedField::numeric().within_days(3);
        assert!(validate_compared_field("amount", &spec).is_err());
        assert!(validate_compared_field("date", &ComparedField::date().within_days(3)).is_ok());
    }
}
