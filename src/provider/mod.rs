use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::descriptor::ResolvedParameter;
use crate::error::Result;

pub mod aws;

pub use aws::{AwsCliClient, AwsCommandRunner, DefaultAwsCommandRunner};

/// Capability acknowledged on every create and update.
pub const CAPABILITY_IAM: &str = "CAPABILITY_IAM";

/// Stack status as reported by the provisioning engine.
///
/// Provider strings are kept verbatim; `GONE` is synthetic and stands for a
/// stack the engine no longer knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StackStatus(String);

impl StackStatus {
    pub const CREATE_IN_PROGRESS: &'static str = "CREATE_IN_PROGRESS";
    pub const CREATE_COMPLETE: &'static str = "CREATE_COMPLETE";
    pub const UPDATE_IN_PROGRESS: &'static str = "UPDATE_IN_PROGRESS";
    pub const UPDATE_COMPLETE_CLEANUP_IN_PROGRESS: &'static str =
        "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS";
    pub const UPDATE_COMPLETE: &'static str = "UPDATE_COMPLETE";
    pub const DELETE_IN_PROGRESS: &'static str = "DELETE_IN_PROGRESS";
    pub const DELETE_COMPLETE: &'static str = "DELETE_COMPLETE";
    pub const GONE: &'static str = "GONE";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn gone() -> Self {
        Self(Self::GONE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is(&self, value: &str) -> bool {
        self.0 == value
    }

    pub fn is_gone(&self) -> bool {
        self.is(Self::GONE)
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StackStatus {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Status, parameters and outputs of a single stack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackDescription {
    pub name: String,
    pub status: StackStatus,
    pub parameters: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackResource {
    pub logical_id: String,
    pub physical_id: Option<String>,
}

/// One entry of a stack's event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEvent {
    pub event_id: String,
    pub timestamp: String,
    pub resource_status: String,
    pub resource_type: String,
    pub logical_resource_id: String,
    pub physical_resource_id: Option<String>,
    pub resource_status_reason: Option<String>,
}

impl fmt::Display for StackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.timestamp,
            self.resource_status,
            self.resource_type,
            self.logical_resource_id,
            self.physical_resource_id.as_deref().unwrap_or("-"),
            self.resource_status_reason.as_deref().unwrap_or("-"),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateStackRequest {
    pub stack_name: String,
    pub template_body: String,
    pub parameters: Vec<ResolvedParameter>,
    pub capabilities: Vec<String>,
    pub notification_arns: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub on_failure: OnFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStackRequest {
    pub stack_name: String,
    pub template_body: String,
    pub parameters: Vec<ResolvedParameter>,
    pub capabilities: Vec<String>,
    pub notification_arns: Vec<String>,
}

/// What the engine does with a stack whose creation failed. Failed creates
/// are always deleted so a later run can start from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    Delete,
}

impl OnFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnFailure::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Started,
    /// The engine reported that there is nothing to update.
    NoChanges,
}

/// Operations the lifecycle code needs from the provisioning engine.
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    /// Names of the stacks that currently exist (deleted stacks are not
    /// listed).
    async fn list_stacks(&self) -> Result<Vec<String>>;

    async fn create_stack(&self, request: &CreateStackRequest) -> Result<()>;

    async fn update_stack(&self, request: &UpdateStackRequest) -> Result<UpdateOutcome>;

    async fn delete_stack(&self, name: &str) -> Result<()>;

    /// `None` when the engine reports that the stack does not exist.
    async fn describe_stack(&self, name: &str) -> Result<Option<StackDescription>>;

    /// Events in the order the engine recorded them, oldest first.
    async fn list_stack_events(&self, name: &str) -> Result<Vec<StackEvent>>;

    async fn get_template(&self, name: &str) -> Result<serde_json::Value>;

    async fn list_stack_resources(&self, name: &str) -> Result<Vec<StackResource>>;
}
