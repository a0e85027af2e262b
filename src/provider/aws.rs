//! CloudFormation access through the AWS CLI.
//!
//! Every call runs `aws cloudformation <operation> --output json` and decodes
//! the JSON document the CLI prints.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, StackGlueError};
use crate::provider::{
    CreateStackRequest, ProvisioningClient, StackDescription, StackEvent, StackResource,
    StackStatus, UpdateOutcome, UpdateStackRequest,
};
use crate::template;

const AWS_BINARY: &str = "aws";
const NO_UPDATES_MARKER: &str = "No updates are to be performed";

/// Captured result of one CLI invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runner responsible for executing AWS CLI commands.
#[async_trait]
pub trait AwsCommandRunner: Send + Sync {
    async fn run(&self, args: &[String]) -> Result<CommandOutput>;
}

pub struct DefaultAwsCommandRunner;

#[async_trait]
impl AwsCommandRunner for DefaultAwsCommandRunner {
    async fn run(&self, args: &[String]) -> Result<CommandOutput> {
        let mut command = Command::new(AWS_BINARY);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!(command = %format!("{AWS_BINARY} {}", redact_bodies(args)), "running aws cli");

        match command.output().await {
            Ok(output) => Ok(CommandOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StackGlueError::AwsCliMissing { binary: AWS_BINARY })
            }
            Err(err) => Err(StackGlueError::Io(err)),
        }
    }
}

fn redact_bodies(args: &[String]) -> String {
    let mut rendered = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            rendered.push(format!("<{} bytes>", arg.len()));
        } else {
            rendered.push(arg.clone());
        }
        hide_next = arg == "--template-body";
    }
    rendered.join(" ")
}

/// [`ProvisioningClient`] backed by the `aws cloudformation` command family.
pub struct AwsCliClient {
    region: String,
    profile: Option<String>,
    runner: Box<dyn AwsCommandRunner>,
}

impl AwsCliClient {
    pub fn new(region: impl Into<String>, profile: Option<String>) -> Self {
        Self::with_runner(region, profile, Box::new(DefaultAwsCommandRunner))
    }

    pub fn with_runner(
        region: impl Into<String>,
        profile: Option<String>,
        runner: Box<dyn AwsCommandRunner>,
    ) -> Self {
        Self {
            region: region.into(),
            profile,
            runner,
        }
    }

    /// Fails early when the CLI binary cannot be found on PATH.
    pub fn ensure_available() -> Result<()> {
        which::which(AWS_BINARY)
            .map(|_| ())
            .map_err(|_| StackGlueError::AwsCliMissing { binary: AWS_BINARY })
    }

    fn args(&self, operation: &str) -> Vec<String> {
        let mut args = vec![
            "cloudformation".to_string(),
            operation.to_string(),
            "--region".to_string(),
            self.region.clone(),
        ];
        if let Some(profile) = &self.profile {
            args.push("--profile".into());
            args.push(profile.clone());
        }
        args.push("--output".into());
        args.push("json".into());
        args.push("--no-cli-pager".into());
        args
    }

    async fn call(
        &self,
        operation: &'static str,
        stack: &str,
        args: Vec<String>,
    ) -> Result<CliResponse> {
        let output = self.runner.run(&args).await?;
        if output.success {
            return Ok(CliResponse::Ok(output.stdout));
        }
        if reports_missing_stack(&output.stderr, stack) {
            return Ok(CliResponse::NotFound(output.stderr));
        }
        if output.stderr.contains(NO_UPDATES_MARKER) {
            return Ok(CliResponse::NoUpdates);
        }
        Err(StackGlueError::provisioning(operation, stack, output.stderr))
    }

    async fn call_expecting(
        &self,
        operation: &'static str,
        stack: &str,
        args: Vec<String>,
    ) -> Result<String> {
        match self.call(operation, stack, args).await? {
            CliResponse::Ok(stdout) => Ok(stdout),
            CliResponse::NotFound(stderr) => {
                Err(StackGlueError::provisioning(operation, stack, stderr))
            }
            CliResponse::NoUpdates => Err(StackGlueError::provisioning(
                operation,
                stack,
                NO_UPDATES_MARKER,
            )),
        }
    }
}

/// True when `stderr` is the engine saying that `stack` itself is unknown.
/// Other "does not exist" messages (a missing bucket, role or change set)
/// stay errors.
fn reports_missing_stack(stderr: &str, stack: &str) -> bool {
    stderr.contains(&format!("Stack with id {stack} does not exist"))
}

enum CliResponse {
    Ok(String),
    NotFound(String),
    NoUpdates,
}

fn decode<T: for<'de> Deserialize<'de> + Default>(stdout: &str) -> Result<T> {
    if stdout.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(stdout)?)
}

fn parameters_json(parameters: &[crate::descriptor::ResolvedParameter]) -> String {
    let entries: Vec<serde_json::Value> = parameters
        .iter()
        .map(|param| {
            if param.use_previous_value {
                json!({ "ParameterKey": param.key, "UsePreviousValue": true })
            } else {
                json!({ "ParameterKey": param.key, "ParameterValue": param.value })
            }
        })
        .collect();
    serde_json::Value::Array(entries).to_string()
}

fn push_list(args: &mut Vec<String>, flag: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    args.push(flag.to_string());
    args.extend(values.iter().cloned());
}

#[async_trait]
impl ProvisioningClient for AwsCliClient {
    async fn list_stacks(&self) -> Result<Vec<String>> {
        let stdout = self
            .call_expecting("describe-stacks", "*", self.args("describe-stacks"))
            .await?;
        let listing: DescribeStacksOutput = decode(&stdout)?;
        Ok(listing
            .stacks
            .into_iter()
            .filter(|stack| stack.stack_status != StackStatus::DELETE_COMPLETE)
            .map(|stack| stack.stack_name)
            .collect())
    }

    async fn create_stack(&self, request: &CreateStackRequest) -> Result<()> {
        let mut args = self.args("create-stack");
        args.extend([
            "--stack-name".to_string(),
            request.stack_name.clone(),
            "--template-body".to_string(),
            request.template_body.clone(),
            "--on-failure".to_string(),
            request.on_failure.as_str().to_string(),
        ]);
        if !request.parameters.is_empty() {
            args.push("--parameters".into());
            args.push(parameters_json(&request.parameters));
        }
        push_list(&mut args, "--capabilities", &request.capabilities);
        push_list(&mut args, "--notification-arns", &request.notification_arns);
        if !request.tags.is_empty() {
            let tags: Vec<serde_json::Value> = request
                .tags
                .iter()
                .map(|(key, value)| json!({ "Key": key, "Value": value }))
                .collect();
            args.push("--tags".into());
            args.push(serde_json::Value::Array(tags).to_string());
        }
        self.call_expecting("create-stack", &request.stack_name, args)
            .await?;
        Ok(())
    }

    async fn update_stack(&self, request: &UpdateStackRequest) -> Result<UpdateOutcome> {
        let mut args = self.args("update-stack");
        args.extend([
            "--stack-name".to_string(),
            request.stack_name.clone(),
            "--template-body".to_string(),
            request.template_body.clone(),
        ]);
        if !request.parameters.is_empty() {
            args.push("--parameters".into());
            args.push(parameters_json(&request.parameters));
        }
        push_list(&mut args, "--capabilities", &request.capabilities);
        push_list(&mut args, "--notification-arns", &request.notification_arns);
        match self.call("update-stack", &request.stack_name, args).await? {
            CliResponse::Ok(_) => Ok(UpdateOutcome::Started),
            CliResponse::NoUpdates => Ok(UpdateOutcome::NoChanges),
            CliResponse::NotFound(stderr) => Err(StackGlueError::provisioning(
                "update-stack",
                &request.stack_name,
                stderr,
            )),
        }
    }

    async fn delete_stack(&self, name: &str) -> Result<()> {
        let mut args = self.args("delete-stack");
        args.extend(["--stack-name".to_string(), name.to_string()]);
        self.call_expecting("delete-stack", name, args).await?;
        Ok(())
    }

    async fn describe_stack(&self, name: &str) -> Result<Option<StackDescription>> {
        let mut args = self.args("describe-stacks");
        args.extend(["--stack-name".to_string(), name.to_string()]);
        let stdout = match self.call("describe-stacks", name, args).await? {
            CliResponse::Ok(stdout) => stdout,
            CliResponse::NotFound(_) => return Ok(None),
            CliResponse::NoUpdates => {
                return Err(StackGlueError::provisioning(
                    "describe-stacks",
                    name,
                    "unexpected response",
                ));
            }
        };
        let listing: DescribeStacksOutput = decode(&stdout)?;
        let Some(stack) = listing.stacks.into_iter().next() else {
            return Ok(None);
        };
        Ok(Some(StackDescription {
            name: stack.stack_name,
            status: StackStatus::new(stack.stack_status),
            parameters: stack
                .parameters
                .into_iter()
                .map(|param| (param.parameter_key, param.parameter_value))
                .collect(),
            outputs: stack
                .outputs
                .into_iter()
                .map(|output| (output.output_key, output.output_value))
                .collect(),
        }))
    }

    async fn list_stack_events(&self, name: &str) -> Result<Vec<StackEvent>> {
        let mut args = self.args("describe-stack-events");
        args.extend(["--stack-name".to_string(), name.to_string()]);
        let stdout = match self.call("describe-stack-events", name, args).await? {
            CliResponse::Ok(stdout) => stdout,
            CliResponse::NotFound(_) | CliResponse::NoUpdates => return Ok(Vec::new()),
        };
        let listing: DescribeStackEventsOutput = decode(&stdout)?;
        // The CLI lists the newest event first.
        Ok(listing
            .stack_events
            .into_iter()
            .rev()
            .map(|event| StackEvent {
                event_id: event.event_id,
                timestamp: event.timestamp,
                resource_status: event.resource_status,
                resource_type: event.resource_type,
                logical_resource_id: event.logical_resource_id,
                physical_resource_id: event.physical_resource_id,
                resource_status_reason: event.resource_status_reason,
            })
            .collect())
    }

    async fn get_template(&self, name: &str) -> Result<serde_json::Value> {
        let mut args = self.args("get-template");
        args.extend(["--stack-name".to_string(), name.to_string()]);
        let stdout = self.call_expecting("get-template", name, args).await?;
        let output: GetTemplateOutput = decode(&stdout)?;
        match output.template_body {
            serde_json::Value::String(text) => template::parse_document(&text)
                .map_err(|message| StackGlueError::provisioning("get-template", name, message)),
            document => Ok(document),
        }
    }

    async fn list_stack_resources(&self, name: &str) -> Result<Vec<StackResource>> {
        let mut args = self.args("list-stack-resources");
        args.extend(["--stack-name".to_string(), name.to_string()]);
        let stdout = self
            .call_expecting("list-stack-resources", name, args)
            .await?;
        let output: ListStackResourcesOutput = decode(&stdout)?;
        Ok(output
            .stack_resource_summaries
            .into_iter()
            .map(|summary| StackResource {
                logical_id: summary.logical_resource_id,
                physical_id: summary.physical_resource_id,
            })
            .collect())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStacksOutput {
    #[serde(default)]
    stacks: Vec<CliStack>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CliStack {
    stack_name: String,
    stack_status: String,
    #[serde(default)]
    parameters: Vec<CliParameter>,
    #[serde(default)]
    outputs: Vec<CliOutput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CliParameter {
    parameter_key: String,
    #[serde(default)]
    parameter_value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CliOutput {
    output_key: String,
    #[serde(default)]
    output_value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStackEventsOutput {
    #[serde(default)]
    stack_events: Vec<CliEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CliEvent {
    event_id: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    resource_status: String,
    #[serde(default)]
    resource_type: String,
    #[serde(default)]
    logical_resource_id: String,
    physical_resource_id: Option<String>,
    resource_status_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetTemplateOutput {
    #[serde(default)]
    template_body: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListStackResourcesOutput {
    #[serde(default)]
    stack_resource_summaries: Vec<CliResourceSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CliResourceSummary {
    logical_resource_id: String,
    physical_resource_id: Option<String>,
}
