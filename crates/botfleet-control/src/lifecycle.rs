//! Create-or-update of a bot's compute function.
//!
//! A function moves through `absent -> update_in_progress -> ready`. Only
//! a ready function accepts the next change, so every push is preceded and
//! followed by a bounded wait.

use std::collections::BTreeMap;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

use crate::cloud::{CloudError, FunctionControlPlane, FunctionSpec, PollResult};
use crate::error::{ControlError, ControlResult};
use crate::retry::RetryPolicy;

/// Environment variable carrying the runtime secret.
pub const SECRET_ENV_VAR: &str = "OPENAI_API_KEY";

/// Environment variable pointing the bot at its config.
pub const CONFIG_ENV_VAR: &str = "USER_CONFIG";

/// Settings applied to every bot function.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionConfig {
    /// Runtime identifier.
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Handler entry point.
    #[serde(default = "default_handler")]
    pub handler: String,

    /// Invocation timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,

    /// Service principal granted invoke permission.
    #[serde(default = "default_invoke_principal")]
    pub invoke_principal: String,

    /// Extra environment variables.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Secret exposed to the bot as [`SECRET_ENV_VAR`].
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub runtime_secret: Option<SecretString>,
}

fn default_runtime() -> String {
    "python3.10".to_owned()
}

fn default_handler() -> String {
    "lambda_function.handler".to_owned()
}

const fn default_timeout_secs() -> u32 {
    30
}

fn default_invoke_principal() -> String {
    "apigateway.amazonaws.com".to_owned()
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value
        .filter(|v| !v.is_empty())
        .map(SecretString::from))
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            handler: default_handler(),
            timeout_secs: default_timeout_secs(),
            invoke_principal: default_invoke_principal(),
            environment: BTreeMap::new(),
            runtime_secret: None,
        }
    }
}

impl FunctionConfig {
    /// Environment of a bot function whose config lives at `config_entry`.
    #[must_use]
    pub fn environment_for(&self, config_entry: &str) -> BTreeMap<String, String> {
        let mut environment = self.environment.clone();
        environment.insert(CONFIG_ENV_VAR.to_owned(), config_entry.to_owned());
        if let Some(secret) = &self.runtime_secret {
            environment.insert(SECRET_ENV_VAR.to_owned(), secret.expose_secret().to_owned());
        }
        environment
    }
}

/// Which path [`FunctionLifecycleManager::create_or_update`] took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// The function did not exist and was created.
    Created,
    /// The function existed and was updated in place.
    Updated,
}

/// Drives a compute function to the desired code and configuration.
#[derive(Clone)]
pub struct FunctionLifecycleManager {
    functions: Arc<dyn FunctionControlPlane>,
    polling: RetryPolicy,
    retry: RetryPolicy,
}

impl FunctionLifecycleManager {
    /// Create a manager.
    #[must_use]
    pub fn new(
        functions: Arc<dyn FunctionControlPlane>,
        polling: RetryPolicy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            functions,
            polling,
            retry,
        }
    }

    /// Create the function, or bring an existing one up to date.
    ///
    /// Creation is attempted first; a conflict means the function exists
    /// and the update path runs instead. The update path is retried as a
    /// whole on transient failures. Running this twice with the same spec
    /// leaves exactly one function.
    pub async fn create_or_update(&self, spec: &FunctionSpec) -> ControlResult<LifecycleAction> {
        match self.functions.create_function(spec).await {
            Ok(()) => {
                info!(function_name = %spec.name, "function created");
                return Ok(LifecycleAction::Created);
            }
            Err(CloudError::Conflict(_)) => {
                info!(function_name = %spec.name, "function exists, updating");
            }
            Err(e) => return Err(ControlError::cloud("create_function", e)),
        }

        self.retry
            .retry("update_function", move |attempt| self.update(spec, attempt))
            .await?;

        info!(function_name = %spec.name, "function updated");
        Ok(LifecycleAction::Updated)
    }

    /// Wait until the function accepts changes or is gone.
    pub async fn wait_until_settled(&self, name: &str) -> ControlResult<PollResult> {
        let functions = &self.functions;
        self.polling
            .poll(name, move || async move {
                functions
                    .get_status(name)
                    .await
                    .map_err(|e| ControlError::cloud("get_function", e))
            })
            .await
    }

    async fn update(&self, spec: &FunctionSpec, attempt: u32) -> ControlResult<()> {
        debug!(function_name = %spec.name, attempt, "starting update");

        self.wait_until_settled(&spec.name).await?;
        self.functions
            .update_code(&spec.name, &spec.code)
            .await
            .map_err(|e| update_error("update_code", e))?;

        self.wait_until_settled(&spec.name).await?;
        self.functions
            .update_configuration(&spec.name, &spec.environment, spec.timeout_secs)
            .await
            .map_err(|e| update_error("update_configuration", e))?;

        self.wait_until_settled(&spec.name).await?;
        Ok(())
    }
}

impl std::fmt::Debug for FunctionLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionLifecycleManager")
            .field("polling", &self.polling)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// A conflict during an update means another change is still settling.
fn update_error(operation: &'static str, err: CloudError) -> ControlError {
    match err {
        CloudError::Conflict(message) => ControlError::TransientCloud { operation, message },
        other => ControlError::cloud(operation, other),
    }
}
