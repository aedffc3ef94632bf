//! In-memory deployment store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{ControlError, ControlResult};
use crate::types::{DeploymentId, DeploymentRecord, DeploymentStatus, UserId};

use super::{DeploymentFilter, DeploymentStore};

/// In-memory deployment store.
///
/// Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    deployments: RwLock<HashMap<String, DeploymentRecord>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn find_active(
        &self,
        predicate: impl Fn(&DeploymentRecord) -> bool,
    ) -> ControlResult<Option<DeploymentRecord>> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(deployments
            .values()
            .filter(|r| r.status == DeploymentStatus::Active && predicate(r))
            .max_by_key(|r| r.updated_at)
            .cloned())
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn insert(&self, record: &DeploymentRecord) -> ControlResult<()> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let key = record.id.as_str().to_owned();
        if deployments.contains_key(&key) {
            return Err(ControlError::internal(format!(
                "deployment {key} already exists"
            )));
        }

        deployments.insert(key, record.clone());
        Ok(())
    }

    async fn get(&self, id: &DeploymentId) -> ControlResult<Option<DeploymentRecord>> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(deployments.get(id.as_str()).cloned())
    }

    async fn replace(&self, record: &DeploymentRecord) -> ControlResult<()> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let stored = deployments
            .get_mut(record.id.as_str())
            .ok_or_else(|| ControlError::DeploymentNotFound(record.id.to_string()))?;
        *stored = record.clone();
        Ok(())
    }

    async fn update_status(
        &self,
        id: &DeploymentId,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> ControlResult<()> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let record = deployments
            .get_mut(id.as_str())
            .ok_or_else(|| ControlError::DeploymentNotFound(id.to_string()))?;

        record.status = status;
        record.error = error.map(ToOwned::to_owned);
        record.updated_at = chrono::Utc::now();

        Ok(())
    }

    async fn find_active_by_config(
        &self,
        user_id: UserId,
        config_ref: &str,
    ) -> ControlResult<Option<DeploymentRecord>> {
        self.find_active(|r| r.user_id == user_id && r.config_ref.as_deref() == Some(config_ref))
    }

    async fn find_active_by_function(
        &self,
        user_id: UserId,
        function_name: &str,
    ) -> ControlResult<Option<DeploymentRecord>> {
        self.find_active(|r| r.user_id == user_id && r.function_name == function_name)
    }

    async fn list(&self, filter: &DeploymentFilter) -> ControlResult<Vec<DeploymentRecord>> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let mut results: Vec<_> = deployments
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = usize::try_from(filter.offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = filter
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));

        Ok(results.into_iter().skip(offset).take(limit).collect())
    }
}
