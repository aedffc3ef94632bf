//! Core deployment orchestration logic.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::botconfig::extract_bot_name;
use crate::cloud::{CloudClients, CloudConfig, FunctionSpec, PermissionGrant};
use crate::config::ControlConfig;
use crate::error::{ControlError, ControlResult};
use crate::lifecycle::{FunctionConfig, FunctionLifecycleManager, LifecycleAction};
use crate::naming::{validate_display_name, NamingConfig, ResolvedBotIdentity};
use crate::package::PackageAssembler;
use crate::permission::PermissionBinder;
use crate::route::RouteBinder;
use crate::store::{DeploymentFilter, DeploymentStore};
use crate::teardown::TeardownCoordinator;
use crate::types::{
    DeployOutput, DeploymentId, DeploymentRecord, DeploymentRequest, DeploymentStatus,
    OperationOutcome, TeardownOutput, UserId,
};

/// Tags attached to every bot function.
#[must_use]
pub fn function_tags(identity: &ResolvedBotIdentity) -> HashMap<String, String> {
    HashMap::from([
        ("Project".to_owned(), "user-app-service".to_owned()),
        ("Environment".to_owned(), "production".to_owned()),
        ("Feature".to_owned(), "user-chat-deployment".to_owned()),
        ("User".to_owned(), identity.user_id.to_string()),
        ("Bot".to_owned(), identity.bot_name.clone()),
    ])
}

/// Orchestrates deploy and teardown of bots.
///
/// [`deploy`](Self::deploy) and [`teardown`](Self::teardown) never fail:
/// every error is folded into [`OperationOutcome::Failed`].
pub struct DeploymentManager {
    store: Arc<dyn DeploymentStore>,
    cloud: CloudConfig,
    function: FunctionConfig,
    naming: NamingConfig,
    assembler: PackageAssembler,
    lifecycle: FunctionLifecycleManager,
    routes: RouteBinder,
    permissions: PermissionBinder,
    teardown: TeardownCoordinator,
}

impl DeploymentManager {
    /// Create a new deployment manager.
    pub fn new(
        config: &ControlConfig,
        clients: CloudClients,
        store: Arc<dyn DeploymentStore>,
    ) -> Self {
        let lifecycle = FunctionLifecycleManager::new(
            clients.functions.clone(),
            config.polling.policy(),
            config.retry.policy(),
        );
        let routes = RouteBinder::new(clients.routing.clone(), &config.cloud);
        let permissions = PermissionBinder::new(clients.functions.clone());
        let teardown = TeardownCoordinator::new(
            clients.functions,
            lifecycle.clone(),
            routes.clone(),
            permissions.clone(),
        );

        Self {
            store,
            cloud: config.cloud.clone(),
            function: config.function.clone(),
            naming: config.naming,
            assembler: PackageAssembler::new(config.package.clone()),
            lifecycle,
            routes,
            permissions,
            teardown,
        }
    }

    /// Deploy a user's bot and report the outcome.
    pub async fn deploy(
        &self,
        user_id: UserId,
        request: &DeploymentRequest,
    ) -> OperationOutcome<DeployOutput> {
        match self.try_deploy(user_id, request).await {
            Ok(output) => OperationOutcome::Completed(output),
            Err(e) => {
                error!(user_id = %user_id, error = %e, "deployment failed");
                OperationOutcome::failed(e.to_string())
            }
        }
    }

    /// Tear down a deployment and report the outcome.
    pub async fn teardown(
        &self,
        user_id: UserId,
        deployment_id: &DeploymentId,
    ) -> OperationOutcome<TeardownOutput> {
        match self.try_teardown(user_id, deployment_id).await {
            Ok(output) => OperationOutcome::Completed(output),
            Err(e) => {
                error!(
                    user_id = %user_id,
                    deployment_id = %deployment_id,
                    error = %e,
                    "teardown failed"
                );
                OperationOutcome::failed(e.to_string())
            }
        }
    }

    /// The record store backing this manager.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DeploymentStore> {
        &self.store
    }

    /// Get a deployment record by ID.
    pub async fn get_deployment(&self, id: &DeploymentId) -> ControlResult<DeploymentRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ControlError::DeploymentNotFound(id.to_string()))
    }

    /// List deployment records.
    pub async fn list_deployments(
        &self,
        filter: &DeploymentFilter,
    ) -> ControlResult<Vec<DeploymentRecord>> {
        self.store.list(filter).await
    }

    async fn try_deploy(
        &self,
        user_id: UserId,
        request: &DeploymentRequest,
    ) -> ControlResult<DeployOutput> {
        let bot_name = match &request.display_name {
            Some(name) => {
                validate_display_name(name)?;
                name.clone()
            }
            None => extract_bot_name(&request.config, user_id)?,
        };
        let identity = ResolvedBotIdentity::resolve(user_id, &bot_name, &self.naming)?;

        if let Some(config_ref) = &request.config_ref {
            if let Some(active) = self.store.find_active_by_config(user_id, config_ref).await? {
                return Err(ControlError::DeploymentAlreadyActive {
                    config_ref: config_ref.clone(),
                    function_name: active.function_name,
                });
            }
        }

        let existing = self
            .store
            .find_active_by_function(user_id, &identity.function_name)
            .await?;
        if let Some(existing) = &existing {
            if existing.bot_name != identity.bot_name {
                return Err(ControlError::NameCollision {
                    function_name: identity.function_name.clone(),
                    existing: existing.bot_name.clone(),
                    requested: identity.bot_name.clone(),
                });
            }
        }

        info!(
            user_id = %user_id,
            bot_name = %identity.bot_name,
            function_name = %identity.function_name,
            "starting deployment"
        );

        let code = self.assembler.assemble(&request.config).await?;
        let spec = FunctionSpec {
            name: identity.function_name.clone(),
            role: self.cloud.execution_role.clone(),
            runtime: self.function.runtime.clone(),
            handler: self.function.handler.clone(),
            timeout_secs: self.function.timeout_secs,
            environment: self
                .function
                .environment_for(&self.assembler.config().config_entry),
            tags: function_tags(&identity),
            code,
        };
        let action = self.lifecycle.create_or_update(&spec).await?;

        self.routes
            .bind(
                &identity.function_name,
                &self.cloud.integration_uri(&identity.function_name),
            )
            .await?;

        self.permissions
            .grant(&PermissionGrant {
                function_name: identity.function_name.clone(),
                statement_id: identity.statement_id.clone(),
                principal: self.function.invoke_principal.clone(),
                source_arn: self.cloud.invoke_source_arn(),
            })
            .await?;

        let endpoint_url = self.cloud.endpoint_url(&identity.route_path);
        let record = self
            .record_deployment(&identity, existing, endpoint_url, request.config_ref.clone())
            .await?;

        info!(
            deployment_id = %record.id,
            function_name = %record.function_name,
            endpoint_url = %record.endpoint_url,
            created = action == LifecycleAction::Created,
            "deployment completed successfully"
        );

        Ok(DeployOutput {
            deployment_id: record.id,
            function_name: record.function_name,
            endpoint_url: record.endpoint_url,
            bot_name: record.bot_name,
        })
    }

    /// Insert a fresh record, or refresh the one already describing this bot.
    async fn record_deployment(
        &self,
        identity: &ResolvedBotIdentity,
        existing: Option<DeploymentRecord>,
        endpoint_url: String,
        config_ref: Option<String>,
    ) -> ControlResult<DeploymentRecord> {
        match existing {
            Some(mut record) => {
                record.statement_id.clone_from(&identity.statement_id);
                record.route_path.clone_from(&identity.route_path);
                record.endpoint_url = endpoint_url;
                if config_ref.is_some() {
                    record.config_ref = config_ref;
                }
                record.status = DeploymentStatus::Active;
                record.error = None;
                record.updated_at = Utc::now();
                self.store.replace(&record).await?;
                Ok(record)
            }
            None => {
                let record = DeploymentRecord::active(identity, endpoint_url, config_ref);
                self.store.insert(&record).await?;
                Ok(record)
            }
        }
    }

    async fn try_teardown(
        &self,
        user_id: UserId,
        deployment_id: &DeploymentId,
    ) -> ControlResult<TeardownOutput> {
        let record = self
            .store
            .get(deployment_id)
            .await?
            .filter(|r| r.user_id == user_id)
            .ok_or_else(|| ControlError::DeploymentNotFound(deployment_id.to_string()))?;

        if record.status == DeploymentStatus::Inactive {
            info!(deployment_id = %deployment_id, "deployment already torn down");
            return Ok(TeardownOutput {
                message: "Teardown successful, nothing left to remove".to_owned(),
            });
        }

        // The function may have been redeployed under a newer record since
        // this one stopped being active. Its resources are not ours to delete.
        if let Some(active) = self
            .store
            .find_active_by_function(user_id, &record.function_name)
            .await?
        {
            if active.id != record.id {
                warn!(
                    deployment_id = %deployment_id,
                    active_deployment_id = %active.id,
                    function_name = %record.function_name,
                    "function now belongs to another deployment, skipping resource removal"
                );
                self.store
                    .update_status(deployment_id, DeploymentStatus::Inactive, None)
                    .await?;
                return Ok(TeardownOutput {
                    message: format!(
                        "Teardown successful, resources now belong to deployment {}",
                        active.id
                    ),
                });
            }
        }

        info!(
            deployment_id = %deployment_id,
            function_name = %record.function_name,
            "starting teardown"
        );

        self.store
            .update_status(deployment_id, DeploymentStatus::MarkedForDeletion, None)
            .await?;

        match self.teardown.teardown(&record).await {
            Ok(report) => {
                self.store
                    .update_status(deployment_id, DeploymentStatus::Inactive, None)
                    .await?;
                let message = if report.was_noop() {
                    "Teardown successful, nothing left to remove"
                } else {
                    "Teardown successful"
                };
                Ok(TeardownOutput {
                    message: message.to_owned(),
                })
            }
            Err(e) => {
                if let Err(store_err) = self
                    .store
                    .update_status(deployment_id, DeploymentStatus::Failed, Some(&e.to_string()))
                    .await
                {
                    warn!(
                        deployment_id = %deployment_id,
                        error = %store_err,
                        "failed to record teardown failure"
                    );
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for DeploymentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentManager")
            .field("cloud", &self.cloud)
            .field("naming", &self.naming)
            .field("assembler", &self.assembler)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tags_identify_user_and_bot() {
        let identity =
            ResolvedBotIdentity::resolve(UserId::new(7), "my bot", &NamingConfig::default())
                .unwrap();
        let tags = function_tags(&identity);

        assert_eq!(tags["Project"], "user-app-service");
        assert_eq!(tags["Environment"], "production");
        assert_eq!(tags["Feature"], "user-chat-deployment");
        assert_eq!(tags["User"], "7");
        assert_eq!(tags["Bot"], "my bot");
    }
}
