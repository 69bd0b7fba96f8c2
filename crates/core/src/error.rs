//! ODM error model.

use thiserror::Error;

/// Result type used across the ODM.
pub type OdmResult<T> = Result<T, OdmError>;

/// Caller-facing ODM error.
///
/// The core never retries; every failure is returned as one of these variants
/// and recovery is left to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OdmError {
    /// No constructor is registered under this model name.
    #[error("model '{0}' is not registered")]
    ModelNotRegistered(String),

    /// A constructor is already registered under this model name.
    #[error("model '{0}' is already registered")]
    ModelAlreadyRegistered(String),

    /// The backing document does not exist.
    ///
    /// `Registry::dispense` turns this into `Ok(None)`.
    #[error("entity '{model}:{id}' is not found in storage")]
    EntityNotFound { model: String, id: String },

    #[error("unknown field '{field}' in model '{model}'")]
    UnknownField { model: String, field: String },

    #[error("field '{field}' already defined in model '{model}'")]
    FieldAlreadyDefined { model: String, field: String },

    /// Wrong value type for a field.
    #[error("field '{field}': {expected} expected, got {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    /// Value has the right type but violates a field constraint.
    #[error("field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("value of the field '{0}' cannot be empty")]
    RequiredFieldEmpty(String),

    #[error("field '{0}' is managed internally and cannot be set")]
    ProtectedField(String),

    #[error("field '{field}' does not support '{operation}'")]
    NotSupported { field: String, operation: String },

    #[error("entity of model '{0}' has been deleted")]
    EntityDeleted(String),

    #[error("invalid comparison operator: '{0}'")]
    InvalidOperator(String),

    #[error("invalid logical operator: '{0}'")]
    InvalidLogicalOperator(String),

    /// A reference was requested from (or built out of) an entity that has
    /// never been saved.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A store call ran past its deadline or was cancelled.
    #[error("store operation cancelled: {0}")]
    Cancelled(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl OdmError {
    pub fn unknown_field(model: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            model: model.into(),
            field: field.into(),
        }
    }

    pub fn type_mismatch(
        field: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_supported(field: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::NotSupported {
            field: field.into(),
            operation: operation.into(),
        }
    }

    pub fn not_found(model: impl Into<String>, id: impl ToString) -> Self {
        Self::EntityNotFound {
            model: model.into(),
            id: id.to_string(),
        }
    }

    pub fn poisoned(what: impl Into<String>) -> Self {
        Self::LockPoisoned(what.into())
    }

    /// True for the "expected, recoverable" not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EntityNotFound { .. })
    }
}
