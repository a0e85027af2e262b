use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::cache::LiveStateCache;
use crate::descriptor::{ResolvedParameter, StackDescriptor};
use crate::error::{Result, StackGlueError};
use crate::graph;
use crate::provider::{
    CAPABILITY_IAM, CreateStackRequest, OnFailure, ProvisioningClient, StackStatus,
    UpdateOutcome, UpdateStackRequest,
};
use crate::resolver::ParameterResolver;
use crate::template::TemplateDocument;
use crate::watcher::{EventSink, EventWatcher, WatchOptions};

const CREATE_IN_PROGRESS: &[&str] = &[StackStatus::CREATE_IN_PROGRESS];
const UPDATE_IN_PROGRESS: &[&str] = &[
    StackStatus::UPDATE_IN_PROGRESS,
    StackStatus::UPDATE_COMPLETE_CLEANUP_IN_PROGRESS,
];
const DELETE_IN_PROGRESS: &[&str] = &[StackStatus::DELETE_IN_PROGRESS];

/// Lifecycle operation over the stack set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Apply,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Apply => "apply",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// Observable state of a stack while the orchestrator works on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPhase {
    Absent,
    PendingCreate,
    PendingUpdate,
    PendingDelete,
    /// Exists and matches the local template and parameters.
    Present,
    /// Exists but differs from the local template or parameters.
    Stale,
    Failed,
    Gone,
}

impl fmt::Display for StackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StackPhase::Absent => "absent",
            StackPhase::PendingCreate => "pending-create",
            StackPhase::PendingUpdate => "pending-update",
            StackPhase::PendingDelete => "pending-delete",
            StackPhase::Present => "present",
            StackPhase::Stale => "stale",
            StackPhase::Failed => "failed",
            StackPhase::Gone => "gone",
        })
    }
}

/// What happened to a single stack during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOutcome {
    Created,
    Updated,
    /// Template and parameters already matched; no call was made.
    UpToDate,
    /// The engine accepted the update request but had nothing to change.
    NoChanges,
    Deleted,
    AlreadyExists,
    NotFound,
}

impl StackOutcome {
    pub fn phase(&self) -> StackPhase {
        match self {
            StackOutcome::Created
            | StackOutcome::Updated
            | StackOutcome::UpToDate
            | StackOutcome::NoChanges
            | StackOutcome::AlreadyExists => StackPhase::Present,
            StackOutcome::Deleted => StackPhase::Gone,
            StackOutcome::NotFound => StackPhase::Absent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackReport {
    pub name: String,
    pub qualified_name: String,
    pub outcome: StackOutcome,
    /// Where the stack was left by the run.
    pub phase: StackPhase,
}

impl StackReport {
    fn new(stack: &StackDescriptor, outcome: StackOutcome) -> Self {
        Self {
            name: stack.name.clone(),
            qualified_name: stack.qualified_name.clone(),
            outcome,
            phase: outcome.phase(),
        }
    }
}

/// Per-stack outcomes of one operation, in processing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub operation: Operation,
    pub stacks: Vec<StackReport>,
}

impl RunReport {
    fn new(operation: Operation) -> Self {
        Self {
            operation,
            stacks: Vec::new(),
        }
    }

    pub fn count(&self, outcome: StackOutcome) -> usize {
        self.stacks
            .iter()
            .filter(|stack| stack.outcome == outcome)
            .count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} created, {} updated, {} unchanged, {} deleted, {} skipped",
            self.operation.as_str(),
            self.count(StackOutcome::Created),
            self.count(StackOutcome::Updated),
            self.count(StackOutcome::UpToDate) + self.count(StackOutcome::NoChanges),
            self.count(StackOutcome::Deleted),
            self.count(StackOutcome::AlreadyExists) + self.count(StackOutcome::NotFound),
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorOptions {
    pub watch: WatchOptions,
    /// Pause after each updated stack to stay under the engine's rate limits.
    pub rate_limit_pause: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            watch: WatchOptions::default(),
            rate_limit_pause: Duration::from_secs(2),
        }
    }
}

/// Drives the stack set through create, update and delete in dependency order.
///
/// The first fatal condition ends the run. Stacks handled earlier in the run
/// keep their new state; nothing is rolled back across stacks.
pub struct LifecycleOrchestrator<'a> {
    stacks: Vec<StackDescriptor>,
    provisioner: Provisioner<'a>,
}

impl<'a> LifecycleOrchestrator<'a> {
    /// Orders `stacks` by dependency; fails before any provisioning call when
    /// the graph cannot be resolved.
    pub fn new(
        stacks: Vec<StackDescriptor>,
        client: &'a dyn ProvisioningClient,
        sink: &'a dyn EventSink,
        options: OrchestratorOptions,
    ) -> Result<Self> {
        let stacks = graph::execution_order(stacks)?;
        let declared = stacks
            .iter()
            .map(|stack| stack.qualified_name.clone())
            .collect();
        Ok(Self {
            stacks,
            provisioner: Provisioner {
                client,
                sink,
                options,
                declared,
                cache: LiveStateCache::new(),
            },
        })
    }

    /// Stacks in the order create and update process them.
    pub fn order(&self) -> &[StackDescriptor] {
        &self.stacks
    }

    pub async fn apply(&mut self, only: Option<&str>) -> Result<RunReport> {
        self.run(Operation::Apply, only).await
    }

    pub async fn create(&mut self, only: Option<&str>) -> Result<RunReport> {
        self.run(Operation::Create, only).await
    }

    pub async fn update(&mut self, only: Option<&str>) -> Result<RunReport> {
        self.run(Operation::Update, only).await
    }

    pub async fn delete(&mut self, only: Option<&str>) -> Result<RunReport> {
        self.run(Operation::Delete, only).await
    }

    pub async fn run(&mut self, operation: Operation, only: Option<&str>) -> Result<RunReport> {
        if let Some(name) = only {
            if !self.stacks.iter().any(|stack| stack.name == name) {
                return Err(StackGlueError::Config(format!(
                    "no stack named '{name}' in the configuration"
                )));
            }
        }

        let mut ordered: Vec<&StackDescriptor> = self.stacks.iter().collect();
        if operation == Operation::Delete {
            ordered.reverse();
        }
        let provisioner = &mut self.provisioner;
        let span = info_span!("lifecycle", operation = operation.as_str(), only = ?only);

        async move {
            let mut report = RunReport::new(operation);
            for stack in ordered {
                if only.is_some_and(|name| name != stack.name) {
                    continue;
                }
                let outcome = match operation {
                    Operation::Apply => provisioner.apply_one(stack).await,
                    Operation::Create => provisioner.create_one(stack).await,
                    Operation::Update => provisioner.update_one(stack).await,
                    Operation::Delete => provisioner.delete_one(stack).await,
                }?;
                report.stacks.push(StackReport::new(stack, outcome));
            }
            info!("{}", report.summary());
            Ok(report)
        }
        .instrument(span)
        .await
    }
}

struct Provisioner<'a> {
    client: &'a dyn ProvisioningClient,
    sink: &'a dyn EventSink,
    options: OrchestratorOptions,
    /// Qualified names of every stack in the set.
    declared: HashSet<String>,
    cache: LiveStateCache,
}

impl<'a> Provisioner<'a> {
    async fn apply_one(&mut self, stack: &StackDescriptor) -> Result<StackOutcome> {
        info!(stack = %stack.name, "determining whether stack needs to be created or updated");
        if self.cache.exists(self.client, &stack.qualified_name).await? {
            self.update_one(stack).await
        } else {
            transition(stack, StackPhase::Absent);
            self.create_one(stack).await
        }
    }

    async fn create_one(&mut self, stack: &StackDescriptor) -> Result<StackOutcome> {
        if self.cache.exists(self.client, &stack.qualified_name).await? {
            warn!(stack = %stack.name, "stack already exists, skipping create");
            return Ok(StackOutcome::AlreadyExists);
        }
        self.ensure_dependencies(stack).await?;
        let parameters = self.resolve(stack).await?;
        let template = TemplateDocument::load(stack)?;

        info!(
            stack = %stack.qualified_name,
            parameters = %describe_parameters(&parameters),
            "creating stack"
        );
        let request = CreateStackRequest {
            stack_name: stack.qualified_name.clone(),
            template_body: template.body()?,
            parameters,
            capabilities: vec![CAPABILITY_IAM.to_string()],
            notification_arns: stack.notification_arns.clone(),
            tags: stack.tags.clone(),
            on_failure: OnFailure::Delete,
        };
        self.client.create_stack(&request).await?;
        transition(stack, StackPhase::PendingCreate);

        let status = self.watch(stack, CREATE_IN_PROGRESS).await?;
        self.cache.invalidate(&stack.qualified_name);
        if !status.is(StackStatus::CREATE_COMPLETE) {
            return Err(failed(stack, "create", status));
        }
        transition(stack, StackPhase::Present);
        info!(stack = %stack.qualified_name, "finished creating stack");
        Ok(StackOutcome::Created)
    }

    async fn update_one(&mut self, stack: &StackDescriptor) -> Result<StackOutcome> {
        if !self.cache.exists(self.client, &stack.qualified_name).await? {
            warn!(stack = %stack.name, "stack does not exist, cannot update it, skipping");
            return Ok(StackOutcome::NotFound);
        }
        let outcome = self.update_existing(stack).await?;
        if !self.options.rate_limit_pause.is_zero() {
            debug!(pause = ?self.options.rate_limit_pause, "pausing to avoid rate limiting");
            sleep(self.options.rate_limit_pause).await;
        }
        Ok(outcome)
    }

    async fn update_existing(&mut self, stack: &StackDescriptor) -> Result<StackOutcome> {
        self.ensure_dependencies(stack).await?;
        let parameters = self.resolve(stack).await?;
        let template = TemplateDocument::load(stack)?;

        let (template_current, parameters_current) = match self
            .cache
            .get_or_fetch(self.client, &stack.qualified_name)
            .await?
        {
            Some(live) => {
                debug!(stack = %stack.name, status = %live.status, "live stack status");
                (
                    template.matches(&live.template),
                    parameters_match(&parameters, &live.parameters),
                )
            }
            None => (false, false),
        };
        debug!(
            stack = %stack.name,
            template_current,
            parameters_current,
            "compared with live state"
        );
        if template_current && parameters_current {
            transition(stack, StackPhase::Present);
            info!(stack = %stack.name, "stack is already up to date, skipping");
            return Ok(StackOutcome::UpToDate);
        }
        transition(stack, StackPhase::Stale);

        info!(
            stack = %stack.qualified_name,
            parameters = %describe_parameters(&parameters),
            "template or parameters changed, updating stack"
        );
        let request = UpdateStackRequest {
            stack_name: stack.qualified_name.clone(),
            template_body: template.body()?,
            parameters,
            capabilities: vec![CAPABILITY_IAM.to_string()],
            notification_arns: stack.notification_arns.clone(),
        };
        match self.client.update_stack(&request).await? {
            UpdateOutcome::NoChanges => {
                info!(stack = %stack.name, "provisioning engine has no updates to perform");
                return Ok(StackOutcome::NoChanges);
            }
            UpdateOutcome::Started => transition(stack, StackPhase::PendingUpdate),
        }

        let status = self.watch(stack, UPDATE_IN_PROGRESS).await?;
        self.cache.invalidate(&stack.qualified_name);
        if !status.is(StackStatus::UPDATE_COMPLETE) {
            return Err(failed(stack, "update", status));
        }
        transition(stack, StackPhase::Present);
        info!(stack = %stack.qualified_name, "finished updating stack");
        Ok(StackOutcome::Updated)
    }

    async fn delete_one(&mut self, stack: &StackDescriptor) -> Result<StackOutcome> {
        if !self.cache.exists(self.client, &stack.qualified_name).await? {
            info!(stack = %stack.name, "stack does not exist, skipping delete");
            return Ok(StackOutcome::NotFound);
        }

        info!(stack = %stack.qualified_name, "deleting stack");
        self.client.delete_stack(&stack.qualified_name).await?;
        transition(stack, StackPhase::PendingDelete);

        let status = self.watch(stack, DELETE_IN_PROGRESS).await?;
        self.cache.invalidate(&stack.qualified_name);
        if !(status.is(StackStatus::DELETE_COMPLETE) || status.is_gone()) {
            return Err(failed(stack, "delete", status));
        }
        transition(stack, StackPhase::Gone);
        info!(stack = %stack.qualified_name, "finished deleting stack");
        Ok(StackOutcome::Deleted)
    }

    async fn ensure_dependencies(&mut self, stack: &StackDescriptor) -> Result<()> {
        let deps = stack.effective_dependencies(|name| self.declared.contains(name));
        let missing = self.cache.missing(self.client, &deps).await?;
        if missing.is_empty() {
            return Ok(());
        }
        Err(StackGlueError::DependencyUnmet {
            stack: stack.name.clone(),
            missing: missing.into_iter().map(str::to_string).collect(),
        })
    }

    async fn resolve(&mut self, stack: &StackDescriptor) -> Result<Vec<ResolvedParameter>> {
        ParameterResolver::new(self.client)
            .resolve(stack, &mut self.cache)
            .await
    }

    async fn watch(&self, stack: &StackDescriptor, in_progress: &[&str]) -> Result<StackStatus> {
        EventWatcher::new(self.client, self.sink, self.options.watch)
            .watch(&stack.qualified_name, in_progress)
            .await
    }
}

fn transition(stack: &StackDescriptor, phase: StackPhase) {
    debug!(stack = %stack.name, phase = %phase, "stack phase");
}

fn failed(stack: &StackDescriptor, operation: &'static str, status: StackStatus) -> StackGlueError {
    transition(stack, StackPhase::Failed);
    StackGlueError::TerminalStatus {
        stack: stack.qualified_name.clone(),
        operation,
        status: status.to_string(),
    }
}

/// Live parameters match when every resolved key/value pair is present and
/// the counts agree. `use_previous_value` is not part of live state.
fn parameters_match(resolved: &[ResolvedParameter], live: &BTreeMap<String, String>) -> bool {
    resolved.len() == live.len()
        && resolved
            .iter()
            .all(|param| live.get(&param.key) == Some(&param.value))
}

fn describe_parameters(parameters: &[ResolvedParameter]) -> String {
    parameters
        .iter()
        .map(|param| {
            if param.use_previous_value {
                format!("{}=<previous>", param.key)
            } else {
                format!("{}={}", param.key, param.value)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
