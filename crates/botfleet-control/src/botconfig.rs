//! Reading the bot name out of an uploaded config file.

use serde_yaml::Value;

use crate::error::{ControlError, ControlResult};
use crate::types::UserId;

/// Key holding the bot's display name.
const BOT_NAME_KEY: &str = "bot_name";

/// Default bot name for configs without one.
#[must_use]
pub fn default_bot_name(user_id: UserId) -> String {
    format!("nameless_bot_{user_id}")
}

/// Extract the bot name from raw YAML config bytes.
///
/// An empty document, a missing key, a null value or a blank string all
/// fall back to [`default_bot_name`]. Anything that is not a key-value
/// document, or a `bot_name` that is not a scalar, is rejected.
pub fn extract_bot_name(raw: &[u8], user_id: UserId) -> ControlResult<String> {
    let document: Value = serde_yaml::from_slice(raw)
        .map_err(|e| ControlError::config_parse(format!("invalid YAML: {e}")))?;

    let mapping = match document {
        Value::Null => return Ok(default_bot_name(user_id)),
        Value::Mapping(mapping) => mapping,
        other => {
            return Err(ControlError::config_parse(format!(
                "expected a key-value document, found {}",
                kind(&other)
            )))
        }
    };

    let name = match mapping.get(BOT_NAME_KEY) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(other) => {
            return Err(ControlError::config_parse(format!(
                "{BOT_NAME_KEY} must be a scalar, found {}",
                kind(other)
            )))
        }
    };

    Ok(name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| default_bot_name(user_id)))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
