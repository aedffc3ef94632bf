//! Invoke permission for the routing service.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cloud::{CloudError, FunctionControlPlane, PermissionGrant};
use crate::error::{ControlError, ControlResult};

/// Grants and revokes invoke permissions.
#[derive(Clone)]
pub struct PermissionBinder {
    functions: Arc<dyn FunctionControlPlane>,
}

impl PermissionBinder {
    /// Create a binder.
    #[must_use]
    pub fn new(functions: Arc<dyn FunctionControlPlane>) -> Self {
        Self { functions }
    }

    /// Add the grant; an existing statement with the same id counts as done.
    pub async fn grant(&self, grant: &PermissionGrant) -> ControlResult<()> {
        match self.functions.add_permission(grant).await {
            Ok(()) => {
                info!(
                    function_name = %grant.function_name,
                    statement_id = %grant.statement_id,
                    "invoke permission granted"
                );
                Ok(())
            }
            Err(CloudError::Conflict(_)) => {
                debug!(statement_id = %grant.statement_id, "invoke permission already present");
                Ok(())
            }
            Err(e) => Err(ControlError::cloud("add_permission", e)),
        }
    }

    /// Remove a statement; a missing function or statement counts as done.
    pub async fn revoke(&self, function_name: &str, statement_id: &str) -> ControlResult<bool> {
        match self
            .functions
            .remove_permission(function_name, statement_id)
            .await
        {
            Ok(()) => {
                info!(function_name, statement_id, "invoke permission removed");
                Ok(true)
            }
            Err(CloudError::NotFound(_)) => {
                debug!(function_name, statement_id, "invoke permission already gone");
                Ok(false)
            }
            Err(e) => Err(ControlError::cloud("remove_permission", e)),
        }
    }
}

impl std::fmt::Debug for PermissionBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionBinder").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use super::*;
    use crate::cloud::{FunctionSpec, MemoryFunctions};
    use crate::package::test_artifact;

    async fn with_function() -> Arc<MemoryFunctions> {
        let functions = Arc::new(MemoryFunctions::default());
        functions
            .create_function(&FunctionSpec {
                name: "user-app-7-support".to_owned(),
                role: "role".to_owned(),
                runtime: "python3.10".to_owned(),
                handler: "lambda_function.handler".to_owned(),
                timeout_secs: 30,
                environment: BTreeMap::new(),
                tags: HashMap::new(),
                code: test_artifact(),
            })
            .await
            .unwrap();
        functions
    }

    fn grant() -> PermissionGrant {
        PermissionGrant {
            function_name: "user-app-7-support".to_owned(),
            statement_id: "apigateway-7-support".to_owned(),
            principal: "apigateway.amazonaws.com".to_owned(),
            source_arn: "arn:aws:execute-api:us-east-1:123456789012:abc123/*/*/user/*".to_owned(),
        }
    }

    #[tokio::test]
    async fn duplicate_grant_is_success() {
        let functions = with_function().await;
        let binder = PermissionBinder::new(functions.clone());

        binder.grant(&grant()).await.unwrap();
        binder.grant(&grant()).await.unwrap();

        assert!(functions.has_permission("user-app-7-support", "apigateway-7-support"));
    }

    #[tokio::test]
    async fn other_grant_failures_propagate() {
        let functions = with_function().await;
        functions.fail_next("add_permission", CloudError::Terminal("policy too large".into()));
        let binder = PermissionBinder::new(functions);

        let err = binder.grant(&grant()).await.unwrap_err();
        assert!(matches!(err, ControlError::TerminalCloud { operation: "add_permission", .. }));
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let functions = with_function().await;
        let binder = PermissionBinder::new(functions.clone());
        binder.grant(&grant()).await.unwrap();

        assert!(binder
            .revoke("user-app-7-support", "apigateway-7-support")
            .await
            .unwrap());
        assert!(!binder
            .revoke("user-app-7-support", "apigateway-7-support")
            .await
            .unwrap());
        assert!(!binder.revoke("user-app-7-gone", "apigateway-7-gone").await.unwrap());
    }
}
