//! Control-plane abstractions for compute functions and HTTP routing.
//!
//! The orchestrator only talks to the outside world through
//! [`FunctionControlPlane`] and [`RoutingControlPlane`]. The AWS
//! implementations drive Lambda and API Gateway; the in-memory ones back
//! tests and local runs.

mod aws;
mod memory;

pub use aws::{AwsFunctions, AwsRouting};
pub use memory::{FunctionCall, MemoryFunctions, MemoryRouting, RoutingCall};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};
use crate::package::PackageArtifact;

/// Result type alias for control-plane calls.
pub type CloudResult<T> = Result<T, CloudError>;

/// Failure reported by a control plane, classified for the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloudError {
    /// The resource already exists.
    #[error("resource conflict: {0}")]
    Conflict(String),
    /// The resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),
    /// Throttling, network or service-side hiccup.
    #[error("{0}")]
    Transient(String),
    /// Anything that will fail again if repeated.
    #[error("{0}")]
    Terminal(String),
}

/// Observed state of a compute function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// A create or update is still being applied.
    InProgress,
    /// The function is ready for the next change.
    Complete,
    /// The function does not exist.
    NotFound,
}

/// Everything needed to create a compute function.
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    /// Function name.
    pub name: String,
    /// Execution role.
    pub role: String,
    /// Runtime identifier.
    pub runtime: String,
    /// Handler entry point.
    pub handler: String,
    /// Invocation timeout in seconds.
    pub timeout_secs: u32,
    /// Environment variables.
    pub environment: BTreeMap<String, String>,
    /// Resource tags.
    pub tags: HashMap<String, String>,
    /// Deployable archive.
    pub code: PackageArtifact,
}

/// Grant allowing a service principal to invoke a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionGrant {
    /// Function the grant applies to.
    pub function_name: String,
    /// Identifier of the grant.
    pub statement_id: String,
    /// Service principal allowed to invoke.
    pub principal: String,
    /// Source the invocations come from.
    pub source_arn: String,
}

/// Route resource of an HTTP API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteResource {
    /// Resource identifier.
    pub id: String,
    /// Full path of the resource.
    pub path: String,
}

/// Control plane managing compute functions.
#[async_trait]
pub trait FunctionControlPlane: Send + Sync {
    /// Create a function.
    ///
    /// Returns [`CloudError::Conflict`] if it already exists.
    async fn create_function(&self, spec: &FunctionSpec) -> CloudResult<()>;

    /// Replace the code of an existing function.
    async fn update_code(&self, name: &str, code: &PackageArtifact) -> CloudResult<()>;

    /// Replace environment and timeout of an existing function.
    async fn update_configuration(
        &self,
        name: &str,
        environment: &BTreeMap<String, String>,
        timeout_secs: u32,
    ) -> CloudResult<()>;

    /// Report whether the function is settled, updating or gone.
    async fn get_status(&self, name: &str) -> CloudResult<PollResult>;

    /// Delete a function.
    ///
    /// Returns [`CloudError::NotFound`] if it does not exist.
    async fn delete_function(&self, name: &str) -> CloudResult<()>;

    /// Add an invoke permission.
    ///
    /// Returns [`CloudError::Conflict`] if the statement id is taken.
    async fn add_permission(&self, grant: &PermissionGrant) -> CloudResult<()>;

    /// Remove an invoke permission.
    ///
    /// Returns [`CloudError::NotFound`] if the function or statement is gone.
    async fn remove_permission(&self, function_name: &str, statement_id: &str)
        -> CloudResult<()>;
}

/// Control plane managing HTTP routes.
#[async_trait]
pub trait RoutingControlPlane: Send + Sync {
    /// List every route resource of an API.
    async fn list_resources(&self, api_id: &str) -> CloudResult<Vec<RouteResource>>;

    /// Check a method exists, returning [`CloudError::NotFound`] otherwise.
    async fn get_method(&self, api_id: &str, resource_id: &str, verb: &str) -> CloudResult<()>;

    /// Create a method on a resource.
    async fn put_method(&self, api_id: &str, resource_id: &str, verb: &str) -> CloudResult<()>;

    /// Point a method at a function, replacing any previous target.
    async fn put_integration(
        &self,
        api_id: &str,
        resource_id: &str,
        verb: &str,
        target_uri: &str,
    ) -> CloudResult<()>;

    /// Delete a method, returning [`CloudError::NotFound`] if absent.
    async fn delete_method(&self, api_id: &str, resource_id: &str, verb: &str)
        -> CloudResult<()>;

    /// Publish the current routes to a stage.
    async fn create_deployment(&self, api_id: &str, stage: &str) -> CloudResult<()>;
}

/// Which control-plane backends to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudProvider {
    /// AWS Lambda and API Gateway.
    #[default]
    Aws,
    /// In-process simulation for local runs.
    Memory,
}

/// Control-plane location and shared routing settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    /// Which backends to use.
    #[serde(default)]
    pub provider: CloudProvider,

    /// Region of every resource.
    #[serde(default = "default_region")]
    pub region: String,

    /// Account owning the resources.
    #[serde(default)]
    pub account_id: String,

    /// Execution role assumed by created functions.
    #[serde(default)]
    pub execution_role: String,

    /// Shared HTTP API all bots are routed through.
    #[serde(default)]
    pub api_gateway_id: String,

    /// Stage routes are published to.
    #[serde(default = "default_stage")]
    pub stage: String,

    /// Catch-all route every bot is multiplexed under.
    #[serde(default = "default_proxy_path")]
    pub proxy_path: String,

    /// Method bound on the proxy route.
    #[serde(default = "default_route_method")]
    pub route_method: String,
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

fn default_stage() -> String {
    "prod".to_owned()
}

fn default_proxy_path() -> String {
    "/user/{proxy+}".to_owned()
}

fn default_route_method() -> String {
    "ANY".to_owned()
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            provider: CloudProvider::default(),
            region: default_region(),
            account_id: String::new(),
            execution_role: String::new(),
            api_gateway_id: String::new(),
            stage: default_stage(),
            proxy_path: default_proxy_path(),
            route_method: default_route_method(),
        }
    }
}

impl CloudConfig {
    /// Check the settings every AWS call depends on are present.
    pub fn validate(&self) -> ControlResult<()> {
        if self.provider == CloudProvider::Memory {
            return Ok(());
        }

        let missing: Vec<&str> = [
            ("cloud.account_id", &self.account_id),
            ("cloud.execution_role", &self.execution_role),
            ("cloud.api_gateway_id", &self.api_gateway_id),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(key, _)| key)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ControlError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )))
        }
    }

    /// Function ARN the routing integration invokes.
    #[must_use]
    pub fn integration_uri(&self, function_name: &str) -> String {
        format!(
            "arn:aws:apigateway:{region}:lambda:path/2015-03-31/functions/arn:aws:lambda:{region}:{account}:function:{function_name}/invocations",
            region = self.region,
            account = self.account_id,
        )
    }

    /// Source ARN covering every bot route of the shared API.
    #[must_use]
    pub fn invoke_source_arn(&self) -> String {
        format!(
            "arn:aws:execute-api:{}:{}:{}/*/*/user/*",
            self.region, self.account_id, self.api_gateway_id
        )
    }

    /// Public URL of a route path.
    #[must_use]
    pub fn endpoint_url(&self, route_path: &str) -> String {
        format!(
            "https://{}.execute-api.{}.amazonaws.com/{}{route_path}",
            self.api_gateway_id, self.region, self.stage
        )
    }
}

/// Control-plane handles shared by every component.
#[derive(Clone)]
pub struct CloudClients {
    /// Compute functions.
    pub functions: Arc<dyn FunctionControlPlane>,
    /// HTTP routing.
    pub routing: Arc<dyn RoutingControlPlane>,
}

impl CloudClients {
    /// Build the clients selected by the configuration.
    pub async fn from_config(config: &CloudConfig) -> ControlResult<Self> {
        config.validate()?;

        match config.provider {
            CloudProvider::Aws => {
                let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(aws_config::Region::new(config.region.clone()))
                    .load()
                    .await;
                Ok(Self {
                    functions: Arc::new(AwsFunctions::new(&sdk_config)),
                    routing: Arc::new(AwsRouting::new(&sdk_config)),
                })
            }
            CloudProvider::Memory => Ok(Self {
                functions: Arc::new(MemoryFunctions::default()),
                routing: Arc::new(MemoryRouting::with_proxy(
                    &config.api_gateway_id,
                    &config.proxy_path,
                )),
            }),
        }
    }
}

impl std::fmt::Debug for CloudClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudClients").finish_non_exhaustive()
    }
}
