//! Deployment record storage.
//!
//! The record store is owned by the surrounding application; the
//! orchestrator only needs the operations below. [`MemoryStore`] backs
//! tests and local runs.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::ControlResult;
use crate::types::{DeploymentId, DeploymentRecord, DeploymentStatus, UserId};

/// Filter criteria for listing deployments.
#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
    /// Filter by owning user.
    pub user_id: Option<UserId>,
    /// Filter by status.
    pub status: Option<DeploymentStatus>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

impl DeploymentFilter {
    /// Create a new empty filter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            user_id: None,
            status: None,
            limit: None,
            offset: None,
        }
    }

    /// Filter by user.
    #[must_use]
    pub const fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Filter by status.
    #[must_use]
    pub const fn with_status(mut self, status: DeploymentStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set maximum results.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set pagination offset.
    #[must_use]
    pub const fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    fn matches(&self, record: &DeploymentRecord) -> bool {
        self.user_id.is_none_or(|user_id| record.user_id == user_id)
            && self.status.is_none_or(|status| record.status == status)
    }
}

/// Backend for storing deployment records.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a new deployment record.
    ///
    /// Returns an error if a deployment with the same ID already exists.
    async fn insert(&self, record: &DeploymentRecord) -> ControlResult<()>;

    /// Get a deployment by ID.
    async fn get(&self, id: &DeploymentId) -> ControlResult<Option<DeploymentRecord>>;

    /// Replace a stored record with `record`, keyed by its ID.
    async fn replace(&self, record: &DeploymentRecord) -> ControlResult<()>;

    /// Update a deployment's status.
    ///
    /// Also updates the `updated_at` timestamp and sets or clears the error.
    async fn update_status(
        &self,
        id: &DeploymentId,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> ControlResult<()>;

    /// Get the active deployment created from a config reference.
    async fn find_active_by_config(
        &self,
        user_id: UserId,
        config_ref: &str,
    ) -> ControlResult<Option<DeploymentRecord>>;

    /// Get the active deployment backed by a function.
    async fn find_active_by_function(
        &self,
        user_id: UserId,
        function_name: &str,
    ) -> ControlResult<Option<DeploymentRecord>>;

    /// List deployments matching the filter criteria.
    ///
    /// Results are ordered by `created_at` descending (newest first).
    async fn list(&self, filter: &DeploymentFilter) -> ControlResult<Vec<DeploymentRecord>>;
}
