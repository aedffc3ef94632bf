//! Reversal of a deployment.
//!
//! Teardown works from the identifiers persisted in the record, never from
//! the user's config, and treats every already-missing resource as removed.
//! Running it twice is harmless.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cloud::{CloudError, FunctionControlPlane, PollResult};
use crate::error::{ControlError, ControlResult};
use crate::lifecycle::FunctionLifecycleManager;
use crate::permission::PermissionBinder;
use crate::route::RouteBinder;
use crate::types::DeploymentRecord;

/// What a teardown actually removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TeardownReport {
    /// The function existed and was deleted.
    pub function_deleted: bool,
    /// A route method was deleted.
    pub route_removed: bool,
    /// The invoke statement existed and was removed.
    pub permission_removed: bool,
}

impl TeardownReport {
    /// Whether nothing was left to remove.
    #[must_use]
    pub const fn was_noop(&self) -> bool {
        !self.function_deleted && !self.route_removed && !self.permission_removed
    }
}

/// Removes the function, route method and invoke permission of a bot.
#[derive(Clone)]
pub struct TeardownCoordinator {
    functions: Arc<dyn FunctionControlPlane>,
    lifecycle: FunctionLifecycleManager,
    routes: RouteBinder,
    permissions: PermissionBinder,
}

impl TeardownCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        functions: Arc<dyn FunctionControlPlane>,
        lifecycle: FunctionLifecycleManager,
        routes: RouteBinder,
        permissions: PermissionBinder,
    ) -> Self {
        Self {
            functions,
            lifecycle,
            routes,
            permissions,
        }
    }

    /// Remove every resource named in `record`.
    pub async fn teardown(&self, record: &DeploymentRecord) -> ControlResult<TeardownReport> {
        let function_name = record.function_name.as_str();
        let mut report = TeardownReport::default();

        if self.lifecycle.wait_until_settled(function_name).await? == PollResult::NotFound {
            debug!(function_name, "function already absent");
        }

        match self.functions.delete_function(function_name).await {
            Ok(()) => {
                info!(function_name, "function deleted");
                report.function_deleted = true;
            }
            Err(CloudError::NotFound(_)) => debug!(function_name, "function already deleted"),
            Err(e) => return Err(ControlError::cloud("delete_function", e)),
        }

        report.route_removed = self.routes.unbind(&record.route_path).await?;
        report.permission_removed = self
            .permissions
            .revoke(function_name, &record.statement_id)
            .await?;

        info!(
            deployment_id = %record.id,
            function_name,
            noop = report.was_noop(),
            "teardown finished"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for TeardownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeardownCoordinator")
            .field("lifecycle", &self.lifecycle)
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}
