#![forbid(unsafe_code)]

pub mod apply;
pub mod cache;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod project;
pub mod provider;
pub mod render;
pub mod resolver;
pub mod telemetry;
pub mod template;
pub mod watcher;

pub use config::{Action, CliArgs, GlueConfig, LogLevel};
pub use descriptor::{
    ParameterSource, ParameterSpec, ParameterValue, ReferenceKind, ResolvedParameter,
    StackDescriptor, StackReference,
};
pub use error::{Result, StackGlueError};
pub use orchestrator::{
    LifecycleOrchestrator, Operation, OrchestratorOptions, RunReport, StackOutcome, StackPhase,
};
pub use project::Project;
pub use provider::{AwsCliClient, ProvisioningClient, StackStatus};
pub use watcher::{EventSink, EventWatcher, TracingEventSink, WatchOptions};
