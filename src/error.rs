use thiserror::Error;

/// Errors surfaced by the authorization engine.
///
/// Every variant maps to a stable error code (see [`AuthzError::code`]) so
/// callers can branch on machine-readable codes while messages stay
/// human-readable. Messages are formatted `<field>: <reason>` or
/// `<operation>: <cause>` and never contain secret material.
#[derive(Error, Debug)]
pub enum AuthzError {
    #[error("{field}: value cannot be null")]
    NullValue { field: String },

    #[error("{field}: cannot be empty")]
    Empty { field: String },

    #[error("{field}: exceeds maximum length of {max} characters")]
    TooLong { field: String, max: usize },

    #[error("{field}: {reason}")]
    InvalidParameter { field: String, reason: String },

    #[error("{field}: expiration must be in the future")]
    PastExpiration { field: String },

    #[error("{operation}: {target} not found")]
    NotFound { operation: String, target: String },

    #[error("{operation}: {cause}")]
    Unsupported { operation: String, cause: String },

    /// Writes without a matching tenant context fail as if the rows were
    /// invisible, mirroring a row-level-security violation.
    #[error("{operation}: namespace is not visible in the active tenant context")]
    TenantRequired { operation: String },

    /// The hierarchy fixed point did not converge within the iteration cap.
    /// Reaching this means the acyclicity invariant has been violated and
    /// the stored hierarchy data is corrupt.
    #[error("hierarchy expansion for {resource_type} exceeded {cap} iterations")]
    HierarchyDiverged { resource_type: String, cap: usize },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthzError {
    /// Stable error code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            AuthzError::NullValue { .. } => "null_value_not_allowed",
            AuthzError::Empty { .. } => "string_data_length_mismatch",
            AuthzError::TooLong { .. } => "string_data_right_truncation",
            AuthzError::InvalidParameter { .. } => "invalid_parameter_value",
            AuthzError::PastExpiration { .. } => "check_violation",
            AuthzError::NotFound { .. } => "no_data_found",
            AuthzError::Unsupported { .. } => "feature_not_supported",
            AuthzError::TenantRequired { .. } => "insufficient_privilege",
            AuthzError::HierarchyDiverged { .. } => "integrity_constraint_violation",
            AuthzError::Storage(_) | AuthzError::Internal(_) => "internal_error",
        }
    }

    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        AuthzError::InvalidParameter {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(operation: &str, target: impl Into<String>) -> Self {
        AuthzError::NotFound {
            operation: operation.to_string(),
            target: target.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthzError>;
