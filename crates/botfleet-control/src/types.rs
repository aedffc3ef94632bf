//! Core types for botfleet-control.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::naming::ResolvedBotIdentity;

/// Identifier of the user owning a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    /// Create a new user ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw numeric ID.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Unique identifier for a deployment record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(String);

impl DeploymentId {
    /// Create a new deployment ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique deployment ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DeploymentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Request to deploy a bot from an uploaded config.
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    /// Raw bytes of the uploaded config file.
    pub config: Vec<u8>,
    /// Reference to the uploaded file in external storage, if any.
    ///
    /// Requests that carry a reference are subject to the
    /// one-artifact-one-deployment rule.
    pub config_ref: Option<String>,
    /// User-chosen bot name overriding the config's `bot_name`.
    pub display_name: Option<String>,
}

impl DeploymentRequest {
    /// Create a request from raw config bytes.
    #[must_use]
    pub fn new(config: impl Into<Vec<u8>>) -> Self {
        Self {
            config: config.into(),
            config_ref: None,
            display_name: None,
        }
    }

    /// Attach the external config reference.
    #[must_use]
    pub fn with_config_ref(mut self, config_ref: impl Into<String>) -> Self {
        self.config_ref = Some(config_ref.into());
        self
    }

    /// Override the bot name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Status of a deployment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Recorded but not yet live.
    Pending,
    /// Live and serving traffic.
    Active,
    /// Torn down.
    Inactive,
    /// The last operation on this deployment failed.
    Failed,
    /// Teardown has started.
    MarkedForDeletion,
}

impl DeploymentStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Failed => "failed",
            Self::MarkedForDeletion => "marked_for_deletion",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "failed" => Ok(Self::Failed),
            "marked_for_deletion" => Ok(Self::MarkedForDeletion),
            _ => Err(format!("unknown deployment status: {s}")),
        }
    }
}

/// A deployment as persisted in the record store.
///
/// Carries every identifier teardown needs, so removal never re-derives
/// names from a config that may have changed since.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Unique record identifier.
    pub id: DeploymentId,
    /// Owning user.
    pub user_id: UserId,
    /// Bot name as the user wrote it.
    pub bot_name: String,
    /// Compute function name.
    pub function_name: String,
    /// Invoke permission statement id.
    pub statement_id: String,
    /// Route path of the bot under the shared proxy.
    pub route_path: String,
    /// Public endpoint URL.
    pub endpoint_url: String,
    /// Reference to the uploaded config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<String>,
    /// Current status.
    pub status: DeploymentStatus,
    /// Reason of the last failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    /// Create an active record for a freshly deployed bot.
    #[must_use]
    pub fn active(
        identity: &ResolvedBotIdentity,
        endpoint_url: String,
        config_ref: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DeploymentId::generate(),
            user_id: identity.user_id,
            bot_name: identity.bot_name.clone(),
            function_name: identity.function_name.clone(),
            statement_id: identity.statement_id.clone(),
            route_path: identity.route_path.clone(),
            endpoint_url,
            config_ref,
            status: DeploymentStatus::Active,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Tagged result of a deploy or teardown task.
///
/// Serialises as `{"status": "completed", ...payload}` or
/// `{"status": "failed", "error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationOutcome<T> {
    /// The operation ran to completion.
    Completed(T),
    /// The operation failed.
    Failed {
        /// Human-readable reason.
        error: String,
    },
}

impl<T> OperationOutcome<T> {
    /// Create a failed outcome.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    /// Returns true if the operation completed.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Get the payload of a completed operation.
    #[must_use]
    pub const fn completed(&self) -> Option<&T> {
        match self {
            Self::Completed(payload) => Some(payload),
            Self::Failed { .. } => None,
        }
    }

    /// Get the failure reason.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Completed(_) => None,
            Self::Failed { error } => Some(error),
        }
    }
}

/// Payload of a completed deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOutput {
    /// Record describing the deployment.
    pub deployment_id: DeploymentId,
    /// Compute function name.
    pub function_name: String,
    /// Public endpoint URL.
    pub endpoint_url: String,
    /// Bot name as the user wrote it.
    pub bot_name: String,
}

/// Payload of a completed teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownOutput {
    /// Summary of what happened.
    pub message: String,
}
