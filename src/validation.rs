//! Input validation shared by every write and query entry point.
//!
//! Two validator kinds exist: identifiers (type and relation names, strict
//! lowercase shape) and free-form ids (actual entity ids, permissive but
//! control-character free). Validators raise early with field-named
//! diagnostics; array validators name the offending index.

use crate::error::{AuthzError, Result};
use chrono::{DateTime, Duration, Utc};

/// Maximum length for identifiers, ids, and namespaces alike.
pub const MAX_LENGTH: usize = 1024;

/// Validate a type or relation name: `^[a-z][a-z0-9_-]*$`, 1..=1024 chars.
pub fn validate_identifier(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(AuthzError::Empty {
            field: field.to_string(),
        });
    }
    if value.len() > MAX_LENGTH {
        return Err(AuthzError::TooLong {
            field: field.to_string(),
            max: MAX_LENGTH,
        });
    }
    let mut chars = value.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_lowercase() {
        return Err(AuthzError::invalid(
            field,
            "must start with lowercase letter",
        ));
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-') {
        return Err(AuthzError::invalid(
            field,
            "may only contain lowercase letters, digits, underscores, and hyphens",
        ));
    }
    Ok(())
}

/// Validate a free-form entity id: 1..=1024 chars, no C0 control characters
/// except TAB/LF/CR, no leading or trailing whitespace.
pub fn validate_free_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AuthzError::Empty {
            field: field.to_string(),
        });
    }
    if value.len() > MAX_LENGTH {
        return Err(AuthzError::TooLong {
            field: field.to_string(),
            max: MAX_LENGTH,
        });
    }
    if value
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
    {
        return Err(AuthzError::invalid(
            field,
            "contains disallowed control characters",
        ));
    }
    if value != value.trim() {
        return Err(AuthzError::invalid(
            field,
            "cannot have leading or trailing whitespace",
        ));
    }
    Ok(())
}

/// Validate a namespace (tenant id): `^[a-z0-9][a-z0-9_-]*$`, 1..=1024 chars.
pub fn validate_namespace(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(AuthzError::Empty {
            field: field.to_string(),
        });
    }
    if value.len() > MAX_LENGTH {
        return Err(AuthzError::TooLong {
            field: field.to_string(),
            max: MAX_LENGTH,
        });
    }
    let mut chars = value.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return Err(AuthzError::invalid(
            field,
            "must start with a lowercase letter or digit",
        ));
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-') {
        return Err(AuthzError::invalid(
            field,
            "may only contain lowercase letters, digits, underscores, and hyphens",
        ));
    }
    Ok(())
}

/// Validate an array of free-form ids, naming the offending index on
/// failure (e.g. `subject_ids[2]: cannot be empty`).
pub fn validate_id_array(field: &str, values: &[String]) -> Result<()> {
    if values.is_empty() {
        return Err(AuthzError::Empty {
            field: field.to_string(),
        });
    }
    for (i, value) in values.iter().enumerate() {
        validate_free_id(&format!("{field}[{i}]"), value)?;
    }
    Ok(())
}

/// Validate that an interval is strictly positive.
pub fn validate_interval(field: &str, interval: Duration) -> Result<()> {
    if interval <= Duration::zero() {
        return Err(AuthzError::invalid(field, "must be a positive interval"));
    }
    Ok(())
}

/// Validate that an expiration, when present, lies strictly in the future.
pub fn validate_expiration(
    field: &str,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<()> {
    if let Some(e) = expires_at {
        if e <= now {
            return Err(AuthzError::PastExpiration {
                field: field.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_accepts_valid_shapes() {
        for v in ["a", "doc", "read_phi", "patient-record", "r2"] {
            assert!(validate_identifier("relation", v).is_ok(), "{v}");
        }
    }

    #[test]
    fn identifier_rejects_bad_shapes() {
        let err = validate_identifier("relation", "READ").unwrap_err();
        assert!(err.to_string().contains("must start with lowercase"));

        let err = validate_identifier("relation", "").unwrap_err();
        assert_eq!(err.code(), "string_data_length_mismatch");

        let err = validate_identifier("relation", &"a".repeat(1025)).unwrap_err();
        assert_eq!(err.code(), "string_data_right_truncation");

        assert!(validate_identifier("relation", "1read").is_err());
        assert!(validate_identifier("relation", "re ad").is_err());
    }

    #[test]
    fn free_id_allows_flexible_content() {
        for v in [
            "alice@example.com",
            "acme/doc-1",
            "path/to/doc#section?v=1",
            "550e8400-e29b-41d4-a716-446655440000",
            "文档-1",
        ] {
            assert!(validate_free_id("resource_id", v).is_ok(), "{v}");
        }
        assert!(validate_free_id("resource_id", &"a".repeat(1024)).is_ok());
    }

    #[test]
    fn free_id_rejects_whitespace_and_controls() {
        assert!(validate_free_id("resource_id", "").is_err());
        assert!(validate_free_id("resource_id", "   ").is_err());
        assert!(validate_free_id("resource_id", " padded").is_err());
        assert!(validate_free_id("resource_id", "padded ").is_err());
        assert!(validate_free_id("resource_id", "bad\x00id").is_err());
        assert!(validate_free_id("resource_id", "bad\x07id").is_err());
        // TAB/LF/CR are tolerated mid-string
        assert!(validate_free_id("resource_id", "a\tb").is_ok());
    }

    #[test]
    fn array_validator_names_the_offending_index() {
        let values = vec!["alice".to_string(), "bob".to_string(), "  ".to_string()];
        let err = validate_id_array("subject_ids", &values).unwrap_err();
        assert!(err.to_string().starts_with("subject_ids[2]"));

        let values = vec!["alice".to_string(), "a".repeat(1025)];
        let err = validate_id_array("subject_ids", &values).unwrap_err();
        assert!(err.to_string().starts_with("subject_ids[1]"));
    }

    #[test]
    fn namespace_shapes() {
        assert!(validate_namespace("namespace", "default").is_ok());
        assert!(validate_namespace("namespace", "9lives").is_ok());
        assert!(validate_namespace("namespace", "tenant-a_1").is_ok());
        assert!(validate_namespace("namespace", "Tenant").is_err());
        assert!(validate_namespace("namespace", "-x").is_err());
        assert!(validate_namespace("namespace", "").is_err());
    }

    #[test]
    fn interval_must_be_positive() {
        assert!(validate_interval("within", Duration::days(7)).is_ok());
        assert!(validate_interval("within", Duration::zero()).is_err());
        assert!(validate_interval("within", Duration::days(-1)).is_err());
    }

    #[test]
    fn expiration_must_be_future() {
        let now = Utc::now();
        assert!(validate_expiration("expires_at", None, now).is_ok());
        assert!(validate_expiration("expires_at", Some(now + Duration::hours(1)), now).is_ok());
        let err = validate_expiration("expires_at", Some(now), now).unwrap_err();
        assert_eq!(err.code(), "check_violation");
        assert!(validate_expiration("expires_at", Some(now - Duration::hours(1)), now).is_err());
    }
}
