use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackGlueError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(
        "could not resolve dependency order for stacks [{}]: circular dependency or dependency on a stack not in the configuration",
        .stacks.join(", ")
    )]
    DependencyCycle { stacks: Vec<String> },

    #[error("dependencies for stack {stack} are not met (missing: {})", .missing.join(", "))]
    DependencyUnmet { stack: String, missing: Vec<String> },

    #[error("stack {stack}: cannot resolve parameter {parameter} from {kind} '{variable}' of {source_stack}: {reason}")]
    ReferenceResolution {
        stack: String,
        parameter: String,
        source_stack: String,
        kind: String,
        variable: String,
        reason: String,
    },

    #[error("{operation} on stack {stack} failed: {message}")]
    Provisioning {
        operation: &'static str,
        stack: String,
        message: String,
    },

    #[error("stack {stack} did not {operation} correctly, status is now {status}")]
    TerminalStatus {
        stack: String,
        operation: &'static str,
        status: String,
    },

    #[error("timed out after {elapsed:?} waiting for stack {stack} (last status {status})")]
    WatchTimeout {
        stack: String,
        status: String,
        elapsed: Duration,
    },

    #[error("cannot parse template {path} for stack {stack}: {message}")]
    Template {
        stack: String,
        path: PathBuf,
        message: String,
    },

    #[error("aws CLI missing on PATH (binary '{binary}'). Install the AWS CLI v2 to talk to CloudFormation.")]
    AwsCliMissing { binary: &'static str },

    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),

    #[error("action '{0}' is not supported")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_bw::Error),
}

impl StackGlueError {
    pub fn provisioning(
        operation: &'static str,
        stack: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        StackGlueError::Provisioning {
            operation,
            stack: stack.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StackGlueError>;
