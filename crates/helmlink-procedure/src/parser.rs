//! The parser adapter: serde validation as a uniform parse function.
//!
//! Procedures don't care which validation machinery produced their
//! parsed input — they consume a [`ParseFn`], a function from raw JSON
//! to either normalized JSON or per-field errors. [`parser_for`] adapts
//! any `Deserialize + Serialize` type into that shape, so a procedure's
//! input contract is just a Rust struct with serde derives.

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::FieldErrors;

/// A uniform "parse or fail" function over JSON values.
///
/// On success the returned value replaces the call's input — parsing
/// normalizes as well as validates (defaults filled in, unknown shapes
/// rejected, numbers coerced by serde's rules).
pub type ParseFn =
    Arc<dyn Fn(&Value) -> Result<Value, FieldErrors> + Send + Sync>;

/// Builds a [`ParseFn`] that validates raw input against `T`.
///
/// The input is deserialized into `T` and re-serialized, so downstream
/// middlewares and the resolver see the normalized JSON shape rather
/// than whatever the client sent.
///
/// # Example
///
/// ```rust
/// use helmlink_procedure::parser_for;
/// use serde::{Deserialize, Serialize};
/// use serde_json::json;
///
/// #[derive(Serialize, Deserialize)]
/// struct CourseInput {
///     heading: f64,
/// }
///
/// let parse = parser_for::<CourseInput>();
/// assert!(parse(&json!({ "heading": 90.0 })).is_ok());
/// assert!(parse(&json!({ "heading": "north" })).is_err());
/// ```
pub fn parser_for<T>() -> ParseFn
where
    T: DeserializeOwned + Serialize,
{
    Arc::new(|raw: &Value| {
        let typed: T = serde_json::from_value(raw.clone())
            .map_err(field_errors_from)?;
        serde_json::to_value(&typed).map_err(|e| {
            let mut errors = FieldErrors::new();
            errors.insert("_".to_string(), e.to_string());
            errors
        })
    })
}

/// Maps a serde_json error to per-field messages.
///
/// serde_json reports field names inline in its messages ("missing
/// field `heading`", "unknown field `speeed`"). Best effort: when a
/// field name can be extracted, the message is keyed by it; otherwise
/// it lands under `"_"`.
fn field_errors_from(err: serde_json::Error) -> FieldErrors {
    let message = err.to_string();
    let mut errors = FieldErrors::new();
    match extract_field_name(&message) {
        Some(field) => {
            errors.insert(field, message);
        }
        None => {
            errors.insert("_".to_string(), message);
        }
    }
    errors
}

/// Pulls the backtick-quoted field name out of a serde_json message.
fn extract_field_name(message: &str) -> Option<String> {
    const PATTERNS: [&str; 3] =
        ["missing field `", "unknown field `", "duplicate field `"];
    for pattern in PATTERNS {
        if let Some(rest) = message
            .find(pattern)
            .map(|i| &message[i + pattern.len()..])
        {
            if let Some(end) = rest.find('`') {
                return Some(rest[..end].to_string());
            }
        }
    }
    None
}
