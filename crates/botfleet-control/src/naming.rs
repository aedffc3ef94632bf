//! Deterministic names for the external resources backing a bot.
//!
//! Every identifier is a pure function of the user id and the bot name, so
//! deploying the same bot twice always addresses the same resources.

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{ControlError, ControlResult};
use crate::types::UserId;

/// Longest function name the compute control plane accepts.
pub const MAX_FUNCTION_NAME_LEN: usize = 64;

/// Naming behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct NamingConfig {
    /// Build the statement id and route path from the raw bot name rather
    /// than the sanitized one.
    ///
    /// Deployments created so far use raw names, and teardown must find
    /// their statements and routes again.
    #[serde(default = "default_unsanitized_statement_id")]
    pub unsanitized_statement_id: bool,
}

const fn default_unsanitized_statement_id() -> bool {
    true
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            unsanitized_statement_id: default_unsanitized_statement_id(),
        }
    }
}

/// Strip every character outside `[A-Za-z0-9_-]`.
///
/// A non-empty name with no allowed characters at all maps to a short
/// digest of the name instead of the empty string.
#[must_use]
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();

    if cleaned.is_empty() && !name.is_empty() {
        let digest = Sha256::digest(name.as_bytes());
        return format!("bot-{}", hex::encode(&digest[..6]));
    }

    cleaned
}

/// Compute function name of a user's bot.
#[must_use]
pub fn function_name(user_id: UserId, bot_name: &str) -> String {
    format!("user-app-{user_id}-{}", sanitize(bot_name))
}

/// Identifiers of every external resource belonging to one bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBotIdentity {
    /// Owning user.
    pub user_id: UserId,
    /// Bot name as the user wrote it.
    pub bot_name: String,
    /// Bot name restricted to `[A-Za-z0-9_-]`.
    pub sanitized_name: String,
    /// Compute function name.
    pub function_name: String,
    /// Invoke permission statement id.
    pub statement_id: String,
    /// Path of the bot's chat route.
    pub route_path: String,
}

impl ResolvedBotIdentity {
    /// Resolve all identifiers for a user's bot.
    pub fn resolve(user_id: UserId, bot_name: &str, config: &NamingConfig) -> ControlResult<Self> {
        if bot_name.is_empty() {
            return Err(ControlError::InvalidBotName {
                name: bot_name.to_owned(),
                reason: "name is empty".to_owned(),
            });
        }

        let sanitized_name = sanitize(bot_name);
        let function_name = function_name(user_id, bot_name);
        if function_name.len() > MAX_FUNCTION_NAME_LEN {
            return Err(ControlError::InvalidBotName {
                name: bot_name.to_owned(),
                reason: format!(
                    "function name {function_name} exceeds {MAX_FUNCTION_NAME_LEN} characters"
                ),
            });
        }

        let path_name = if config.unsanitized_statement_id {
            bot_name
        } else {
            sanitized_name.as_str()
        };

        Ok(Self {
            user_id,
            bot_name: bot_name.to_owned(),
            statement_id: format!("apigateway-{user_id}-{path_name}"),
            route_path: format!("/user/{user_id}/{path_name}/chat"),
            sanitized_name,
            function_name,
        })
    }
}

/// Check a user-supplied display name.
pub fn validate_display_name(name: &str) -> ControlResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(ControlError::InvalidBotName {
            name: name.to_owned(),
            reason: "display names may only contain letters, digits, '-' and '_'".to_owned(),
        })
    }
}
