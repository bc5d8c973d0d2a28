//! Value encoding for the remote engines
//!
//! Values travel as their canonical JSON text so integers stay usable by the
//! backends' native counter commands.

use serde_json::Value;

use crate::cache::validate::is_scalar;

pub(crate) fn encode(value: &Value) -> String {
    value.to_string()
}

/// Parses stored text back into a value.
///
/// Text not written by this crate comes back as a JSON string.
pub(crate) fn decode(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or_else(|_| Value::String(raw))
}

/// What `multi_get` reports for a stored value: structured values read as absent.
pub(crate) fn multi_get_view(value: Option<Value>) -> Option<Value> {
    value.filter(is_scalar)
}
