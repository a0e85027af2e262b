use tracing::{Instrument, debug, info, info_span};

use crate::config::GlueConfig;
use crate::descriptor::StackDescriptor;
use crate::error::{Result, StackGlueError};
use crate::orchestrator::{LifecycleOrchestrator, Operation, RunReport};
use crate::project::Project;
use crate::provider::{AwsCliClient, ProvisioningClient};
use crate::telemetry;
use crate::watcher::{EventSink, TracingEventSink};

/// Runs the configured action against CloudFormation through the AWS CLI.
pub async fn run(config: GlueConfig) -> Result<RunReport> {
    telemetry::init(&config)?;
    let operation = operation_for(&config)?;

    let project = {
        let span = info_span!("load", config = %config.config_path.display());
        let _enter = span.enter();
        Project::load(&config.config_path)?
    };

    AwsCliClient::ensure_available()?;
    let client = AwsCliClient::new(project.region.clone(), config.profile.clone());
    run_project(&config, operation, project, &client, &TracingEventSink).await
}

/// Runs `operation` for an already loaded project with the given client and
/// event sink.
pub async fn run_project(
    config: &GlueConfig,
    operation: Operation,
    project: Project,
    client: &dyn ProvisioningClient,
    sink: &dyn EventSink,
) -> Result<RunReport> {
    let span = stage_span(operation, &project);
    let project_name = project.name.clone();
    let mut orchestrator = {
        let _enter = span.enter();
        LifecycleOrchestrator::new(project.stacks, client, sink, config.orchestrator_options())?
    };
    log_summary(&project_name, orchestrator.order());
    orchestrator
        .run(operation, config.stack.as_deref())
        .instrument(span)
        .await
}

fn operation_for(config: &GlueConfig) -> Result<Operation> {
    config.action.operation().ok_or_else(|| {
        StackGlueError::Unsupported(format!(
            "{} (change sets are not implemented)",
            config.action.as_str()
        ))
    })
}

fn log_summary(project: &str, order: &[StackDescriptor]) {
    info!(project = %project, "project name: {project}");
    info!(stacks = order.len(), "number of stacks: {}", order.len());
    let names: Vec<&str> = order.iter().map(|stack| stack.name.as_str()).collect();
    info!("stack order: {}", names.join(", "));
    for stack in order {
        debug!(
            stack = %stack.name,
            "depends on: {}",
            stack.depends_on.as_deref().unwrap_or_default().join(", ")
        );
    }
}

fn stage_span(operation: Operation, project: &Project) -> tracing::Span {
    info_span!(
        "stackglue",
        operation = operation.as_str(),
        project = %project.name,
        environment = %project.environment,
        region = %project.region
    )
}
