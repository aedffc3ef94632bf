//! HTTP route binding.
//!
//! Every bot is served through one shared catch-all proxy route. Binding
//! re-points that route at the bot's function and republishes the stage.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cloud::{CloudConfig, CloudError, RouteResource, RoutingControlPlane};
use crate::error::{ControlError, ControlResult};

/// Binds and unbinds routes on the shared HTTP API.
#[derive(Clone)]
pub struct RouteBinder {
    routing: Arc<dyn RoutingControlPlane>,
    api_id: String,
    proxy_path: String,
    verb: String,
    stage: String,
}

impl RouteBinder {
    /// Create a binder for the API named in the configuration.
    #[must_use]
    pub fn new(routing: Arc<dyn RoutingControlPlane>, config: &CloudConfig) -> Self {
        Self {
            routing,
            api_id: config.api_gateway_id.clone(),
            proxy_path: config.proxy_path.clone(),
            verb: config.route_method.clone(),
            stage: config.stage.clone(),
        }
    }

    /// Point the proxy route at `integration_uri` and publish the stage.
    ///
    /// The catch-all method is created only if missing. The integration is
    /// always rewritten and the stage always republished, so a repeat bind
    /// repairs a half-finished one.
    pub async fn bind(&self, function_name: &str, integration_uri: &str) -> ControlResult<()> {
        let proxy = self.find(&self.proxy_path).await?.ok_or_else(|| {
            ControlError::cloud(
                "get_resources",
                CloudError::NotFound(format!(
                    "proxy resource {} not found in API {}",
                    self.proxy_path, self.api_id
                )),
            )
        })?;

        match self
            .routing
            .get_method(&self.api_id, &proxy.id, &self.verb)
            .await
        {
            Ok(()) => debug!(resource_id = %proxy.id, verb = %self.verb, "proxy method exists"),
            Err(CloudError::NotFound(_)) => self.put_method(&proxy.id).await?,
            Err(e) => return Err(ControlError::cloud("get_method", e)),
        }

        self.routing
            .put_integration(&self.api_id, &proxy.id, &self.verb, integration_uri)
            .await
            .map_err(|e| ControlError::cloud("put_integration", e))?;

        self.routing
            .create_deployment(&self.api_id, &self.stage)
            .await
            .map_err(|e| ControlError::cloud("create_deployment", e))?;

        info!(
            function_name,
            resource_id = %proxy.id,
            stage = %self.stage,
            "route bound and published"
        );
        Ok(())
    }

    /// Delete the method of the resource at `route_path`.
    ///
    /// Returns whether a method was removed. A missing resource or method
    /// counts as already removed.
    pub async fn unbind(&self, route_path: &str) -> ControlResult<bool> {
        let Some(resource) = self.find(route_path).await? else {
            debug!(route_path, "no route resource, skipping method removal");
            return Ok(false);
        };

        match self
            .routing
            .delete_method(&self.api_id, &resource.id, &self.verb)
            .await
        {
            Ok(()) => {
                info!(route_path, resource_id = %resource.id, "route method deleted");
                Ok(true)
            }
            Err(CloudError::NotFound(_)) => {
                debug!(route_path, "route method already gone");
                Ok(false)
            }
            Err(e) => Err(ControlError::cloud("delete_method", e)),
        }
    }

    async fn find(&self, path: &str) -> ControlResult<Option<RouteResource>> {
        let resources = self
            .routing
            .list_resources(&self.api_id)
            .await
            .map_err(|e| ControlError::cloud("get_resources", e))?;
        Ok(resources.into_iter().find(|r| r.path == path))
    }

    async fn put_method(&self, resource_id: &str) -> ControlResult<()> {
        match self
            .routing
            .put_method(&self.api_id, resource_id, &self.verb)
            .await
        {
            Ok(()) => {
                info!(resource_id, verb = %self.verb, "proxy method created");
                Ok(())
            }
            // Created concurrently by another deploy.
            Err(CloudError::Conflict(_)) => Ok(()),
            Err(e) => Err(ControlError::cloud("put_method", e)),
        }
    }
}

impl std::fmt::Debug for RouteBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteBinder")
            .field("api_id", &self.api_id)
            .field("proxy_path", &self.proxy_path)
            .field("verb", &self.verb)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}
