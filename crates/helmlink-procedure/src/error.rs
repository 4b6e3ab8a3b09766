//! Error types for the procedure layer.

use std::collections::BTreeMap;

use crate::ProcedureKind;

/// Per-field validation messages, keyed by field name.
///
/// Fields that cannot be attributed to a specific input key land under
/// the `"_"` key.
pub type FieldErrors = BTreeMap<String, String>;

/// Errors that can occur while building or calling procedures.
///
/// `Clone` because a single error may be both logged server-side and
/// translated into a wire payload for the client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcedureError {
    /// Raw input failed its parser. Carries per-field messages and is
    /// returned to the single calling client only — never fatal.
    #[error("input validation failed")]
    Validation { field_errors: FieldErrors },

    /// No procedure exists at this path with this kind. Covers both the
    /// unknown-path and the kind-mismatch case (calling a `send`
    /// procedure as a `request` is the same protocol error as calling a
    /// path that was never registered).
    #[error("no such procedure: {path} ({kind})")]
    NoSuchProcedure {
        path: String,
        kind: ProcedureKind,
    },

    /// Router construction found colliding flattened paths. All
    /// collisions are batched into one error so composition mistakes
    /// surface in a single pass.
    #[error("duplicate procedure paths: {}", paths.join(", "))]
    DuplicatePaths { paths: Vec<String> },

    /// A resolver or middleware failed. Logged server-side and surfaced
    /// to the client as a plain message.
    #[error("{0}")]
    Failed(String),
}

impl ProcedureError {
    /// Shorthand for a single-field validation error.
    pub fn invalid_field(
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut field_errors = FieldErrors::new();
        field_errors.insert(field.into(), message.into());
        Self::Validation { field_errors }
    }

    /// Shorthand for a resolver failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
