//! In-memory control planes.
//!
//! They keep just enough state to answer like the real services do and
//! record every call, so tests can tell a create from an update and count
//! uploads. Transitional states and failures can be injected.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{
    CloudError, CloudResult, FunctionControlPlane, FunctionSpec, PermissionGrant, PollResult,
    RouteResource, RoutingControlPlane,
};
use crate::package::PackageArtifact;

fn poisoned() -> CloudError {
    CloudError::Terminal("lock poisoned".to_owned())
}

/// Call received by [`MemoryFunctions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionCall {
    /// `create_function`.
    Create(String),
    /// `update_code`.
    UpdateCode(String),
    /// `update_configuration`.
    UpdateConfiguration(String),
    /// `get_status`.
    GetStatus(String),
    /// `delete_function`.
    Delete(String),
    /// `add_permission` with the statement id.
    AddPermission(String, String),
    /// `remove_permission` with the statement id.
    RemovePermission(String, String),
}

impl FunctionCall {
    const fn operation(&self) -> &'static str {
        match self {
            Self::Create(_) => "create_function",
            Self::UpdateCode(_) => "update_code",
            Self::UpdateConfiguration(_) => "update_configuration",
            Self::GetStatus(_) => "get_status",
            Self::Delete(_) => "delete_function",
            Self::AddPermission(..) => "add_permission",
            Self::RemovePermission(..) => "remove_permission",
        }
    }
}

#[derive(Debug, Clone)]
struct StoredFunction {
    code: Vec<u8>,
    environment: BTreeMap<String, String>,
    timeout_secs: u32,
    tags: HashMap<String, String>,
    statements: HashSet<String>,
    pending_checks: u32,
}

#[derive(Debug, Default)]
struct FunctionState {
    functions: HashMap<String, StoredFunction>,
    calls: Vec<FunctionCall>,
    failures: HashMap<&'static str, VecDeque<CloudError>>,
    settle_after: u32,
}

impl FunctionState {
    /// Log the call and hand out an injected failure for it, if any.
    fn record(&mut self, call: FunctionCall) -> CloudResult<()> {
        let operation = call.operation();
        self.calls.push(call);
        match self.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn changed(&mut self, name: &str) {
        let settle_after = self.settle_after;
        if let Some(function) = self.functions.get_mut(name) {
            function.pending_checks = settle_after;
        }
    }
}

/// In-memory compute control plane.
#[derive(Debug, Default)]
pub struct MemoryFunctions {
    state: RwLock<FunctionState>,
}

impl MemoryFunctions {
    /// Report every changed function as updating for `checks` status calls.
    #[must_use]
    pub fn with_settle_after(self, checks: u32) -> Self {
        if let Ok(mut state) = self.state.write() {
            state.settle_after = checks;
        }
        self
    }

    /// Keep an existing function updating for the next `checks` status calls.
    pub fn hold_in_progress(&self, name: &str, checks: u32) {
        if let Ok(mut state) = self.state.write() {
            if let Some(function) = state.functions.get_mut(name) {
                function.pending_checks = checks;
            }
        }
    }

    /// Make the next call of `operation` fail with `err`.
    ///
    /// Failures queue up per operation and are handed out in order.
    pub fn fail_next(&self, operation: &'static str, err: CloudError) {
        if let Ok(mut state) = self.state.write() {
            state.failures.entry(operation).or_default().push_back(err);
        }
    }

    /// Delete a function behind the orchestrator's back.
    pub fn remove_externally(&self, name: &str) {
        if let Ok(mut state) = self.state.write() {
            state.functions.remove(name);
        }
    }

    /// Every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<FunctionCall> {
        self.state
            .read()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    /// Number of code uploads, through create or update.
    #[must_use]
    pub fn upload_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, FunctionCall::Create(_) | FunctionCall::UpdateCode(_)))
            .count()
    }

    /// Whether a function exists.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.state
            .read()
            .map(|state| state.functions.contains_key(name))
            .unwrap_or(false)
    }

    /// Number of functions.
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.state
            .read()
            .map(|state| state.functions.len())
            .unwrap_or(0)
    }

    /// Current code of a function.
    #[must_use]
    pub fn code(&self, name: &str) -> Option<Vec<u8>> {
        let state = self.state.read().ok()?;
        state.functions.get(name).map(|f| f.code.clone())
    }

    /// Current environment of a function.
    #[must_use]
    pub fn environment(&self, name: &str) -> Option<BTreeMap<String, String>> {
        let state = self.state.read().ok()?;
        state.functions.get(name).map(|f| f.environment.clone())
    }

    /// Current timeout of a function.
    #[must_use]
    pub fn timeout_secs(&self, name: &str) -> Option<u32> {
        let state = self.state.read().ok()?;
        state.functions.get(name).map(|f| f.timeout_secs)
    }

    /// Tags of a function.
    #[must_use]
    pub fn tags(&self, name: &str) -> Option<HashMap<String, String>> {
        let state = self.state.read().ok()?;
        state.functions.get(name).map(|f| f.tags.clone())
    }

    /// Whether a function carries an invoke statement.
    #[must_use]
    pub fn has_permission(&self, name: &str, statement_id: &str) -> bool {
        self.state
            .read()
            .map(|state| {
                state
                    .functions
                    .get(name)
                    .is_some_and(|f| f.statements.contains(statement_id))
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl FunctionControlPlane for MemoryFunctions {
    async fn create_function(&self, spec: &FunctionSpec) -> CloudResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.record(FunctionCall::Create(spec.name.clone()))?;

        if state.functions.contains_key(&spec.name) {
            return Err(CloudError::Conflict(format!(
                "function already exists: {}",
                spec.name
            )));
        }

        state.functions.insert(
            spec.name.clone(),
            StoredFunction {
                code: spec.code.bytes().to_vec(),
                environment: spec.environment.clone(),
                timeout_secs: spec.timeout_secs,
                tags: spec.tags.clone(),
                statements: HashSet::new(),
                pending_checks: 0,
            },
        );
        state.changed(&spec.name);
        Ok(())
    }

    async fn update_code(&self, name: &str, code: &PackageArtifact) -> CloudResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.record(FunctionCall::UpdateCode(name.to_owned()))?;

        let function = state
            .functions
            .get_mut(name)
            .ok_or_else(|| CloudError::NotFound(format!("function not found: {name}")))?;
        if function.pending_checks > 0 {
            return Err(CloudError::Conflict(format!(
                "an update is in progress for function {name}"
            )));
        }
        function.code = code.bytes().to_vec();
        state.changed(name);
        Ok(())
    }

    async fn update_configuration(
        &self,
        name: &str,
        environment: &BTreeMap<String, String>,
        timeout_secs: u32,
    ) -> CloudResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.record(FunctionCall::UpdateConfiguration(name.to_owned()))?;

        let function = state
            .functions
            .get_mut(name)
            .ok_or_else(|| CloudError::NotFound(format!("function not found: {name}")))?;
        if function.pending_checks > 0 {
            return Err(CloudError::Conflict(format!(
                "an update is in progress for function {name}"
            )));
        }
        function.environment = environment.clone();
        function.timeout_secs = timeout_secs;
        state.changed(name);
        Ok(())
    }

    async fn get_status(&self, name: &str) -> CloudResult<PollResult> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.record(FunctionCall::GetStatus(name.to_owned()))?;

        match state.functions.get_mut(name) {
            None => Ok(PollResult::NotFound),
            Some(function) if function.pending_checks > 0 => {
                function.pending_checks -= 1;
                Ok(PollResult::InProgress)
            }
            Some(_) => Ok(PollResult::Complete),
        }
    }

    async fn delete_function(&self, name: &str) -> CloudResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.record(FunctionCall::Delete(name.to_owned()))?;

        state
            .functions
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound(format!("function not found: {name}")))
    }

    async fn add_permission(&self, grant: &PermissionGrant) -> CloudResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.record(FunctionCall::AddPermission(
            grant.function_name.clone(),
            grant.statement_id.clone(),
        ))?;

        let function = state.functions.get_mut(&grant.function_name).ok_or_else(|| {
            CloudError::NotFound(format!("function not found: {}", grant.function_name))
        })?;
        if function.statements.insert(grant.statement_id.clone()) {
            Ok(())
        } else {
            Err(CloudError::Conflict(format!(
                "statement id already exists: {}",
                grant.statement_id
            )))
        }
    }

    async fn remove_permission(&self, function_name: &str, statement_id: &str) -> CloudResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.record(FunctionCall::RemovePermission(
            function_name.to_owned(),
            statement_id.to_owned(),
        ))?;

        let removed = state
            .functions
            .get_mut(function_name)
            .is_some_and(|f| f.statements.remove(statement_id));
        if removed {
            Ok(())
        } else {
            Err(CloudError::NotFound(format!(
                "statement {statement_id} not found on {function_name}"
            )))
        }
    }
}

/// Call received by [`MemoryRouting`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingCall {
    /// `list_resources`.
    ListResources,
    /// `get_method` on a resource.
    GetMethod(String),
    /// `put_method` on a resource.
    PutMethod(String),
    /// `put_integration` with resource and target.
    PutIntegration(String, String),
    /// `delete_method` on a resource.
    DeleteMethod(String),
    /// `create_deployment` to a stage.
    CreateDeployment(String),
}

impl RoutingCall {
    const fn operation(&self) -> &'static str {
        match self {
            Self::ListResources => "list_resources",
            Self::GetMethod(_) => "get_method",
            Self::PutMethod(_) => "put_method",
            Self::PutIntegration(..) => "put_integration",
            Self::DeleteMethod(_) => "delete_method",
            Self::CreateDeployment(_) => "create_deployment",
        }
    }
}

#[derive(Debug, Default)]
struct RoutingState {
    resources: HashMap<String, Vec<RouteResource>>,
    /// Integration target per (api, resource, verb); `None` until integrated.
    methods: HashMap<(String, String, String), Option<String>>,
    calls: Vec<RoutingCall>,
    failures: HashMap<&'static str, VecDeque<CloudError>>,
    next_id: u32,
}

impl RoutingState {
    fn record(&mut self, call: RoutingCall) -> CloudResult<()> {
        let operation = call.operation();
        self.calls.push(call);
        match self.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn api(&self, api_id: &str) -> CloudResult<&Vec<RouteResource>> {
        self.resources
            .get(api_id)
            .ok_or_else(|| CloudError::NotFound(format!("invalid API identifier: {api_id}")))
    }

    fn resource_exists(&self, api_id: &str, resource_id: &str) -> CloudResult<()> {
        if self.api(api_id)?.iter().any(|r| r.id == resource_id) {
            Ok(())
        } else {
            Err(CloudError::NotFound(format!(
                "invalid resource identifier: {resource_id}"
            )))
        }
    }
}

fn method_key(api_id: &str, resource_id: &str, verb: &str) -> (String, String, String) {
    (api_id.to_owned(), resource_id.to_owned(), verb.to_owned())
}

/// In-memory HTTP routing control plane.
#[derive(Debug, Default)]
pub struct MemoryRouting {
    state: RwLock<RoutingState>,
}

impl MemoryRouting {
    /// Create a control plane holding one API with a single proxy resource.
    #[must_use]
    pub fn with_proxy(api_id: &str, proxy_path: &str) -> Self {
        let routing = Self::default();
        routing.add_resource(api_id, proxy_path);
        routing
    }

    /// Add a route resource, returning its id.
    pub fn add_resource(&self, api_id: &str, path: &str) -> String {
        let Ok(mut state) = self.state.write() else {
            return String::new();
        };
        state.next_id += 1;
        let id = format!("res{:04}", state.next_id);
        state
            .resources
            .entry(api_id.to_owned())
            .or_default()
            .push(RouteResource {
                id: id.clone(),
                path: path.to_owned(),
            });
        id
    }

    /// Add a method with an integration directly, bypassing the call log.
    pub fn add_method(&self, api_id: &str, resource_id: &str, verb: &str, target_uri: &str) {
        if let Ok(mut state) = self.state.write() {
            state.methods.insert(
                method_key(api_id, resource_id, verb),
                Some(target_uri.to_owned()),
            );
        }
    }

    /// Make the next call of `operation` fail with `err`.
    pub fn fail_next(&self, operation: &'static str, err: CloudError) {
        if let Ok(mut state) = self.state.write() {
            state.failures.entry(operation).or_default().push_back(err);
        }
    }

    /// Resource id of a path.
    #[must_use]
    pub fn resource_id(&self, api_id: &str, path: &str) -> Option<String> {
        let state = self.state.read().ok()?;
        state
            .resources
            .get(api_id)?
            .iter()
            .find(|r| r.path == path)
            .map(|r| r.id.clone())
    }

    /// Whether a method exists.
    #[must_use]
    pub fn has_method(&self, api_id: &str, resource_id: &str, verb: &str) -> bool {
        self.state
            .read()
            .map(|state| {
                state
                    .methods
                    .contains_key(&method_key(api_id, resource_id, verb))
            })
            .unwrap_or(false)
    }

    /// Integration target of a method.
    #[must_use]
    pub fn integration(&self, api_id: &str, resource_id: &str, verb: &str) -> Option<String> {
        let state = self.state.read().ok()?;
        state
            .methods
            .get(&method_key(api_id, resource_id, verb))
            .cloned()
            .flatten()
    }

    /// Every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RoutingCall> {
        self.state
            .read()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    /// Number of stage deployments.
    #[must_use]
    pub fn publish_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RoutingCall::CreateDeployment(_)))
            .count()
    }
}

#[async_trait]
impl RoutingControlPlane for MemoryRouting {
    async fn list_resources(&self, api_id: &str) -> CloudResult<Vec<RouteResource>> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.record(RoutingCall::ListResources)?;
        state.api(api_id).cloned()
    }

    async fn get_method(&self, api_id: &str, resource_id: &str, verb: &str) -> CloudResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.record(RoutingCall::GetMethod(resource_id.to_owned()))?;
        state.resource_exists(api_id, resource_id)?;

        if state
            .methods
            .contains_key(&method_key(api_id, resource_id, verb))
        {
            Ok(())
        } else {
            Err(CloudError::NotFound(format!(
                "no {verb} method on {resource_id}"
            )))
        }
    }

    async fn put_method(&self, api_id: &str, resource_id: &str, verb: &str) -> CloudResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.record(RoutingCall::PutMethod(resource_id.to_owned()))?;
        state.resource_exists(api_id, resource_id)?;

        let key = method_key(api_id, resource_id, verb);
        if state.methods.contains_key(&key) {
            return Err(CloudError::Conflict(format!(
                "method {verb} already exists on {resource_id}"
            )));
        }
        state.methods.insert(key, None);
        Ok(())
    }

    async fn put_integration(
        &self,
        api_id: &str,
        resource_id: &str,
        verb: &str,
        target_uri: &str,
    ) -> CloudResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.record(RoutingCall::PutIntegration(
            resource_id.to_owned(),
            target_uri.to_owned(),
        ))?;
        state.resource_exists(api_id, resource_id)?;

        match state.methods.get_mut(&method_key(api_id, resource_id, verb)) {
            Some(target) => {
                *target = Some(target_uri.to_owned());
                Ok(())
            }
            None => Err(CloudError::NotFound(format!(
                "no {verb} method on {resource_id}"
            ))),
        }
    }

    async fn delete_method(&self, api_id: &str, resource_id: &str, verb: &str) -> CloudResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.record(RoutingCall::DeleteMethod(resource_id.to_owned()))?;
        state.resource_exists(api_id, resource_id)?;

        state
            .methods
            .remove(&method_key(api_id, resource_id, verb))
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound(format!("no {verb} method on {resource_id}")))
    }

    async fn create_deployment(&self, api_id: &str, stage: &str) -> CloudResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.record(RoutingCall::CreateDeployment(stage.to_owned()))?;
        state.api(api_id).map(|_| ())
    }
}
