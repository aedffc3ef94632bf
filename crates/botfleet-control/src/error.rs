//! Error types for botfleet-control.

use std::time::Duration;

use crate::cloud::CloudError;

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur while deploying or tearing down a bot.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The uploaded configuration could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// The bot name cannot be turned into valid resource identifiers.
    #[error("invalid bot name {name:?}: {reason}")]
    InvalidBotName {
        /// The offending name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The deployable archive could not be assembled or verified.
    #[error("packaging error: {0}")]
    Packaging(String),

    /// A control-plane call failed in a way that may succeed if repeated.
    #[error("transient cloud error during {operation}: {message}")]
    TransientCloud {
        /// Control-plane operation that failed.
        operation: &'static str,
        /// Error reported by the control plane.
        message: String,
    },

    /// A control-plane call failed permanently.
    #[error("cloud error during {operation}: {message}")]
    TerminalCloud {
        /// Control-plane operation that failed.
        operation: &'static str,
        /// Error reported by the control plane.
        message: String,
    },

    /// A resource stayed in a transitional state past the polling bound.
    #[error("{resource} still updating after {attempts} checks over {waited:?}")]
    PollTimeout {
        /// Resource being polled.
        resource: String,
        /// Number of status checks performed.
        attempts: u32,
        /// Total time spent waiting.
        waited: Duration,
    },

    /// The same config artifact already backs an active deployment.
    #[error("config {config_ref} is already deployed as {function_name}")]
    DeploymentAlreadyActive {
        /// Config reference of the request.
        config_ref: String,
        /// Function backing the existing deployment.
        function_name: String,
    },

    /// Two different bot names resolve to the same function for one user.
    #[error(
        "bot name {requested:?} resolves to {function_name}, already used by bot {existing:?}"
    )]
    NameCollision {
        /// Function name both bots resolve to.
        function_name: String,
        /// Bot name of the active deployment.
        existing: String,
        /// Bot name of the new request.
        requested: String,
    },

    /// Deployment record not found.
    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    /// Another queued or running task already covers this bot.
    #[error("{key} already has task {task_id} in flight")]
    OperationInFlight {
        /// Identity the tasks share.
        key: String,
        /// Task holding the identity.
        task_id: String,
    },

    /// The task queue is at capacity.
    #[error("task queue is full")]
    QueueFull,

    /// Service configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create a config parse error.
    #[must_use]
    pub fn config_parse(msg: impl Into<String>) -> Self {
        Self::ConfigParse(msg.into())
    }

    /// Create a packaging error.
    #[must_use]
    pub fn packaging(msg: impl Into<String>) -> Self {
        Self::Packaging(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Attach the failing operation to a control-plane error.
    ///
    /// Conflicts and missing resources that reach this point were not
    /// expected by the caller and are reported as terminal.
    #[must_use]
    pub fn cloud(operation: &'static str, err: CloudError) -> Self {
        match err {
            CloudError::Transient(message) => Self::TransientCloud { operation, message },
            CloudError::Conflict(message)
            | CloudError::NotFound(message)
            | CloudError::Terminal(message) => Self::TerminalCloud { operation, message },
        }
    }

    /// Whether repeating the failed step may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientCloud { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_cloud_errors_are_retryable() {
        let transient = ControlError::cloud("update_code", CloudError::Transient("throttled".into()));
        assert!(transient.is_transient());

        let conflict = ControlError::cloud("create", CloudError::Conflict("exists".into()));
        assert!(matches!(conflict, ControlError::TerminalCloud { .. }));
        assert!(!conflict.is_transient());

        let timeout = ControlError::PollTimeout {
            resource: "user-app-1-bot".into(),
            attempts: 12,
            waited: Duration::from_secs(120),
        };
        assert!(!timeout.is_transient());
    }

    #[test]
    fn messages_name_the_operation() {
        let err = ControlError::cloud("add_permission", CloudError::Terminal("denied".into()));
        assert_eq!(err.to_string(), "cloud error during add_permission: denied");
    }
}
