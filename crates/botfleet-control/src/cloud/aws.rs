//! AWS Lambda and API Gateway backends.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use aws_sdk_apigateway::types::IntegrationType;
use aws_sdk_lambda::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{Environment, FunctionCode, LastUpdateStatus, Runtime, State};
use tracing::debug;

use super::{
    CloudError, CloudResult, FunctionControlPlane, FunctionSpec, PermissionGrant, PollResult,
    RouteResource, RoutingControlPlane,
};
use crate::package::PackageArtifact;

const INVOKE_ACTION: &str = "lambda:InvokeFunction";
const PAGE_SIZE: i32 = 500;

/// Sort an SDK failure into the classes the orchestrator reacts to.
fn classify<E, R>(err: &SdkError<E, R>) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(err).to_string();

    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            CloudError::Transient(message)
        }
        SdkError::ServiceError(service) => match service.err().code() {
            Some("ResourceConflictException" | "ConflictException") => {
                CloudError::Conflict(message)
            }
            Some("ResourceNotFoundException" | "NotFoundException") => {
                CloudError::NotFound(message)
            }
            Some(
                "TooManyRequestsException"
                | "ThrottlingException"
                | "ServiceException"
                | "ServiceUnavailableException"
                | "ResourceNotReadyException",
            ) => CloudError::Transient(message),
            _ => CloudError::Terminal(message),
        },
        _ => CloudError::Terminal(message),
    }
}

fn timeout_value(timeout_secs: u32) -> CloudResult<i32> {
    i32::try_from(timeout_secs)
        .map_err(|_| CloudError::Terminal(format!("timeout out of range: {timeout_secs}")))
}

fn environment(variables: &BTreeMap<String, String>) -> Environment {
    let variables: HashMap<String, String> = variables
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Environment::builder().set_variables(Some(variables)).build()
}

/// Compute control plane backed by AWS Lambda.
#[derive(Debug, Clone)]
pub struct AwsFunctions {
    client: aws_sdk_lambda::Client,
}

impl AwsFunctions {
    /// Create a backend from loaded SDK configuration.
    #[must_use]
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_lambda::Client::new(config),
        }
    }
}

#[async_trait]
impl FunctionControlPlane for AwsFunctions {
    async fn create_function(&self, spec: &FunctionSpec) -> CloudResult<()> {
        let code = FunctionCode::builder()
            .zip_file(Blob::new(spec.code.bytes().to_vec()))
            .build();

        self.client
            .create_function()
            .function_name(&spec.name)
            .runtime(Runtime::from(spec.runtime.as_str()))
            .role(&spec.role)
            .handler(&spec.handler)
            .code(code)
            .timeout(timeout_value(spec.timeout_secs)?)
            .environment(environment(&spec.environment))
            .set_tags(Some(spec.tags.clone()))
            .send()
            .await
            .map_err(|e| classify(&e))?;

        debug!(function_name = %spec.name, "lambda function created");
        Ok(())
    }

    async fn update_code(&self, name: &str, code: &PackageArtifact) -> CloudResult<()> {
        self.client
            .update_function_code()
            .function_name(name)
            .zip_file(Blob::new(code.bytes().to_vec()))
            .send()
            .await
            .map_err(|e| classify(&e))?;
        Ok(())
    }

    async fn update_configuration(
        &self,
        name: &str,
        environment_vars: &BTreeMap<String, String>,
        timeout_secs: u32,
    ) -> CloudResult<()> {
        self.client
            .update_function_configuration()
            .function_name(name)
            .timeout(timeout_value(timeout_secs)?)
            .environment(environment(environment_vars))
            .send()
            .await
            .map_err(|e| classify(&e))?;
        Ok(())
    }

    async fn get_status(&self, name: &str) -> CloudResult<PollResult> {
        let output = match self
            .client
            .get_function_configuration()
            .function_name(name)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                return match classify(&e) {
                    CloudError::NotFound(_) => Ok(PollResult::NotFound),
                    other => Err(other),
                }
            }
        };

        let updating = matches!(output.last_update_status(), Some(LastUpdateStatus::InProgress))
            || matches!(output.state(), Some(State::Pending));

        Ok(if updating {
            PollResult::InProgress
        } else {
            PollResult::Complete
        })
    }

    async fn delete_function(&self, name: &str) -> CloudResult<()> {
        self.client
            .delete_function()
            .function_name(name)
            .send()
            .await
            .map_err(|e| classify(&e))?;
        Ok(())
    }

    async fn add_permission(&self, grant: &PermissionGrant) -> CloudResult<()> {
        self.client
            .add_permission()
            .function_name(&grant.function_name)
            .statement_id(&grant.statement_id)
            .action(INVOKE_ACTION)
            .principal(&grant.principal)
            .source_arn(&grant.source_arn)
            .send()
            .await
            .map_err(|e| classify(&e))?;
        Ok(())
    }

    async fn remove_permission(&self, function_name: &str, statement_id: &str) -> CloudResult<()> {
        self.client
            .remove_permission()
            .function_name(function_name)
            .statement_id(statement_id)
            .send()
            .await
            .map_err(|e| classify(&e))?;
        Ok(())
    }
}

/// Routing control plane backed by API Gateway REST APIs.
#[derive(Debug, Clone)]
pub struct AwsRouting {
    client: aws_sdk_apigateway::Client,
}

impl AwsRouting {
    /// Create a backend from loaded SDK configuration.
    #[must_use]
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_apigateway::Client::new(config),
        }
    }
}

#[async_trait]
impl RoutingControlPlane for AwsRouting {
    async fn list_resources(&self, api_id: &str) -> CloudResult<Vec<RouteResource>> {
        let mut resources = Vec::new();
        let mut position: Option<String> = None;

        loop {
            let page = self
                .client
                .get_resources()
                .rest_api_id(api_id)
                .limit(PAGE_SIZE)
                .set_position(position.take())
                .send()
                .await
                .map_err(|e| classify(&e))?;

            resources.extend(page.items().iter().filter_map(|item| {
                Some(RouteResource {
                    id: item.id()?.to_owned(),
                    path: item.path()?.to_owned(),
                })
            }));

            match page.position() {
                Some(next) if !next.is_empty() => position = Some(next.to_owned()),
                _ => break,
            }
        }

        Ok(resources)
    }

    async fn get_method(&self, api_id: &str, resource_id: &str, verb: &str) -> CloudResult<()> {
        self.client
            .get_method()
            .rest_api_id(api_id)
            .resource_id(resource_id)
            .http_method(verb)
            .send()
            .await
            .map_err(|e| classify(&e))?;
        Ok(())
    }

    async fn put_method(&self, api_id: &str, resource_id: &str, verb: &str) -> CloudResult<()> {
        self.client
            .put_method()
            .rest_api_id(api_id)
            .resource_id(resource_id)
            .http_method(verb)
            .authorization_type("NONE")
            .request_parameters("method.request.path.proxy", true)
            .send()
            .await
            .map_err(|e| classify(&e))?;
        Ok(())
    }

    async fn put_integration(
        &self,
        api_id: &str,
        resource_id: &str,
        verb: &str,
        target_uri: &str,
    ) -> CloudResult<()> {
        self.client
            .put_integration()
            .rest_api_id(api_id)
            .resource_id(resource_id)
            .http_method(verb)
            .r#type(IntegrationType::AwsProxy)
            .integration_http_method("POST")
            .uri(target_uri)
            .send()
            .await
            .map_err(|e| classify(&e))?;
        Ok(())
    }

    async fn delete_method(&self, api_id: &str, resource_id: &str, verb: &str) -> CloudResult<()> {
        self.client
            .delete_method()
            .rest_api_id(api_id)
            .resource_id(resource_id)
            .http_method(verb)
            .send()
            .await
            .map_err(|e| classify(&e))?;
        Ok(())
    }

    async fn create_deployment(&self, api_id: &str, stage: &str) -> CloudResult<()> {
        self.client
            .create_deployment()
            .rest_api_id(api_id)
            .stage_name(stage)
            .send()
            .await
            .map_err(|e| classify(&e))?;
        Ok(())
    }
}
