#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use stackglue::error::{Result, StackGlueError};
use stackglue::orchestrator::OrchestratorOptions;
use stackglue::provider::{
    CreateStackRequest, ProvisioningClient, StackDescription, StackEvent, StackResource,
    StackStatus, UpdateOutcome, UpdateStackRequest,
};
use stackglue::watcher::{EventSink, WatchOptions};
use stackglue::{ParameterSpec, StackDescriptor};

pub const PROJECT: &str = "shop";
pub const ENVIRONMENT: &str = "dev";
pub const REGION: &str = "eu-west-1";

/// Provisioning calls observed by [`FakeCloud`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListStacks,
    Create(String),
    Update(String),
    Delete(String),
    Describe(String),
    Events(String),
    Template(String),
    Resources(String),
}

impl Call {
    fn mutation(&self) -> Option<(&'static str, &str)> {
        match self {
            Call::Create(name) => Some(("create", name)),
            Call::Update(name) => Some(("update", name)),
            Call::Delete(name) => Some(("delete", name)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Pending {
    Status(String),
    Remove,
}

/// One live stack inside [`FakeCloud`].
#[derive(Debug, Clone)]
pub struct FakeStack {
    pub status: String,
    pub parameters: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
    pub resources: Vec<StackResource>,
    pub template: Value,
    pub events: Vec<StackEvent>,
    pending: Option<Pending>,
}

impl FakeStack {
    pub fn complete(template: Value) -> Self {
        Self {
            status: StackStatus::CREATE_COMPLETE.to_string(),
            parameters: BTreeMap::new(),
            outputs: BTreeMap::new(),
            resources: Vec::new(),
            template,
            events: Vec::new(),
            pending: None,
        }
    }

    pub fn with_parameter(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_output(mut self, key: &str, value: &str) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    pub fn with_resource(mut self, logical_id: &str, physical_id: &str) -> Self {
        self.resources.push(StackResource {
            logical_id: logical_id.into(),
            physical_id: Some(physical_id.into()),
        });
        self
    }
}

#[derive(Default)]
struct State {
    stacks: BTreeMap<String, FakeStack>,
    calls: Vec<Call>,
    created: Vec<CreateStackRequest>,
    updated: Vec<UpdateStackRequest>,
    outputs_on_create: HashMap<String, BTreeMap<String, String>>,
    failures: HashMap<String, String>,
    no_updates: HashSet<String>,
    next_event: u64,
}

impl State {
    fn push_event(&mut self, name: &str, status: &str) {
        self.next_event += 1;
        let event = StackEvent {
            event_id: format!("evt-{}", self.next_event),
            timestamp: format!("2024-01-01T00:00:{:02}Z", self.next_event % 60),
            resource_status: status.to_string(),
            resource_type: "AWS::CloudFormation::Stack".to_string(),
            logical_resource_id: name.to_string(),
            physical_resource_id: Some(format!("arn:aws:cloudformation:{REGION}:1:stack/{name}")),
            resource_status_reason: None,
        };
        if let Some(stack) = self.stacks.get_mut(name) {
            stack.events.push(event);
        }
    }
}

/// In-memory provisioning engine.
///
/// Mutations move a stack into an in-progress status; the next describe
/// reports that status and then settles the stack, so a watcher sees one
/// in-progress tick before the terminal status.
#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<State>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, name: &str, stack: FakeStack) {
        self.state.lock().unwrap().stacks.insert(name.to_string(), stack);
    }

    /// Outputs a stack gets once its creation completes.
    pub fn outputs_on_create(&self, name: &str, outputs: &[(&str, &str)]) {
        let outputs = outputs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        self.state
            .lock()
            .unwrap()
            .outputs_on_create
            .insert(name.to_string(), outputs);
    }

    /// The next mutation on `name` settles in `status` instead of succeeding.
    pub fn fail_next(&self, name: &str, status: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(name.to_string(), status.to_string());
    }

    /// Updates on `name` report that there is nothing to change.
    pub fn no_updates(&self, name: &str) {
        self.state.lock().unwrap().no_updates.insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Create, update and delete calls as `(operation, stack)` pairs.
    pub fn mutations(&self) -> Vec<(&'static str, String)> {
        self.calls()
            .iter()
            .filter_map(|call| call.mutation().map(|(op, name)| (op, name.to_string())))
            .collect()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|seen| *seen == call).count()
    }

    pub fn created(&self) -> Vec<CreateStackRequest> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn updated(&self) -> Vec<UpdateStackRequest> {
        self.state.lock().unwrap().updated.clone()
    }

    pub fn status(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .stacks
            .get(name)
            .map(|stack| stack.status.clone())
    }

    pub fn add_event(&self, name: &str, status: &str) {
        self.state.lock().unwrap().push_event(name, status);
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl ProvisioningClient for FakeCloud {
    async fn list_stacks(&self) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListStacks);
        Ok(state.stacks.keys().cloned().collect())
    }

    async fn create_stack(&self, request: &CreateStackRequest) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let name = request.stack_name.clone();
        state.calls.push(Call::Create(name.clone()));
        if state.stacks.contains_key(&name) {
            return Err(StackGlueError::provisioning(
                "create",
                &name,
                format!("Stack [{name}] already exists"),
            ));
        }
        let template = serde_json::from_str(&request.template_body)?;
        let settled = state
            .failures
            .remove(&name)
            .unwrap_or_else(|| StackStatus::CREATE_COMPLETE.to_string());
        let mut stack = FakeStack::complete(template);
        stack.status = StackStatus::CREATE_IN_PROGRESS.to_string();
        stack.parameters = request
            .parameters
            .iter()
            .map(|param| (param.key.clone(), param.value.clone()))
            .collect();
        stack.outputs = state.outputs_on_create.get(&name).cloned().unwrap_or_default();
        stack.pending = Some(Pending::Status(settled));
        state.stacks.insert(name.clone(), stack);
        state.push_event(&name, StackStatus::CREATE_IN_PROGRESS);
        state.created.push(request.clone());
        Ok(())
    }

    async fn update_stack(&self, request: &UpdateStackRequest) -> Result<UpdateOutcome> {
        let mut state = self.state.lock().unwrap();
        let name = request.stack_name.clone();
        state.calls.push(Call::Update(name.clone()));
        state.updated.push(request.clone());
        if state.no_updates.contains(&name) {
            return Ok(UpdateOutcome::NoChanges);
        }
        let template: Value = serde_json::from_str(&request.template_body)?;
        let settled = state
            .failures
            .remove(&name)
            .unwrap_or_else(|| StackStatus::UPDATE_COMPLETE.to_string());
        let Some(stack) = state.stacks.get_mut(&name) else {
            return Err(StackGlueError::provisioning(
                "update",
                &name,
                format!("Stack with id {name} does not exist"),
            ));
        };
        stack.template = template;
        for param in &request.parameters {
            if !param.use_previous_value {
                stack.parameters.insert(param.key.clone(), param.value.clone());
            }
        }
        stack.status = StackStatus::UPDATE_IN_PROGRESS.to_string();
        stack.pending = Some(Pending::Status(settled));
        state.push_event(&name, StackStatus::UPDATE_IN_PROGRESS);
        Ok(UpdateOutcome::Started)
    }

    async fn delete_stack(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Delete(name.to_string()));
        let pending = match state.failures.remove(name) {
            Some(status) => Pending::Status(status),
            None => Pending::Remove,
        };
        let Some(stack) = state.stacks.get_mut(name) else {
            return Err(StackGlueError::provisioning(
                "delete",
                name,
                format!("Stack with id {name} does not exist"),
            ));
        };
        stack.status = StackStatus::DELETE_IN_PROGRESS.to_string();
        stack.pending = Some(pending);
        state.push_event(name, StackStatus::DELETE_IN_PROGRESS);
        Ok(())
    }

    async fn describe_stack(&self, name: &str) -> Result<Option<StackDescription>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Describe(name.to_string()));
        let Some(stack) = state.stacks.get_mut(name) else {
            return Ok(None);
        };
        let description = StackDescription {
            name: name.to_string(),
            status: StackStatus::new(stack.status.clone()),
            parameters: stack.parameters.clone(),
            outputs: stack.outputs.clone(),
        };
        match stack.pending.take() {
            Some(Pending::Status(status)) => {
                stack.status = status.clone();
                state.push_event(name, &status);
            }
            Some(Pending::Remove) => {
                state.push_event(name, StackStatus::DELETE_COMPLETE);
                state.stacks.remove(name);
            }
            None => {}
        }
        Ok(Some(description))
    }

    async fn list_stack_events(&self, name: &str) -> Result<Vec<StackEvent>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Events(name.to_string()));
        Ok(state
            .stacks
            .get(name)
            .map(|stack| stack.events.clone())
            .unwrap_or_default())
    }

    async fn get_template(&self, name: &str) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Template(name.to_string()));
        state
            .stacks
            .get(name)
            .map(|stack| stack.template.clone())
            .ok_or_else(|| StackGlueError::provisioning("get-template", name, "does not exist"))
    }

    async fn list_stack_resources(&self, name: &str) -> Result<Vec<StackResource>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Resources(name.to_string()));
        Ok(state
            .stacks
            .get(name)
            .map(|stack| stack.resources.clone())
            .unwrap_or_default())
    }
}

/// Event sink that keeps every event it receives.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, StackEvent)>>,
}

impl RecordingSink {
    pub fn event_ids(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| event.event_id.clone())
            .collect()
    }

    pub fn statuses(&self, stack: &str) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == stack)
            .map(|(_, event)| event.resource_status.clone())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, stack: &str, event: &StackEvent) {
        self.events
            .lock()
            .unwrap()
            .push((stack.to_string(), event.clone()));
    }
}

pub fn options() -> OrchestratorOptions {
    OrchestratorOptions {
        watch: WatchOptions {
            poll_interval: Duration::ZERO,
            deadline: Some(Duration::from_secs(5)),
        },
        rate_limit_pause: Duration::ZERO,
    }
}

pub fn qualified(name: &str) -> String {
    format!("{PROJECT}-{ENVIRONMENT}-{name}")
}

/// Minimal template document unique to `name`.
pub fn template_for(name: &str) -> Value {
    json!({
        "AWSTemplateFormatVersion": "2010-09-09",
        "Resources": {
            "Topic": {
                "Type": "AWS::SNS::Topic",
                "Properties": { "TopicName": name }
            }
        }
    })
}

pub fn write_template(dir: &Path, name: &str, document: &Value) -> PathBuf {
    let path = dir.join(format!("{name}.json"));
    std::fs::write(&path, serde_json::to_string_pretty(document).unwrap()).unwrap();
    path
}

/// Stack `name` with a template file written under `dir`.
pub fn stack(dir: &Path, name: &str) -> StackDescriptor {
    let path = write_template(dir, name, &template_for(name));
    StackDescriptor::new(PROJECT, ENVIRONMENT, name, REGION, path)
}

pub fn stack_with_deps(dir: &Path, name: &str, deps: &[&str]) -> StackDescriptor {
    stack(dir, name).with_dependencies(deps.iter().copied())
}

pub fn stack_with_params(dir: &Path, name: &str, params: Vec<ParameterSpec>) -> StackDescriptor {
    params
        .into_iter()
        .fold(stack(dir, name), |stack, param| stack.with_parameter(param))
}
