use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::{Result, StackGlueError};
use crate::orchestrator::{Operation, OrchestratorOptions};
use crate::watcher::WatchOptions;

/// Available CLI actions.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Create missing stacks and update existing ones.
    Apply,
    /// Update existing stacks only.
    Update,
    /// Delete stacks in reverse dependency order.
    Delete,
    #[value(name = "createcs")]
    CreateChangeSet,
    #[value(name = "listcs")]
    ListChangeSets,
    #[value(name = "applycs")]
    ApplyChangeSet,
    #[value(name = "deletecs")]
    DeleteChangeSet,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Apply => "apply",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::CreateChangeSet => "createcs",
            Action::ListChangeSets => "listcs",
            Action::ApplyChangeSet => "applycs",
            Action::DeleteChangeSet => "deletecs",
        }
    }

    /// Lifecycle operation behind the action; `None` for change-set actions.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Action::Apply => Some(Operation::Apply),
            Action::Update => Some(Operation::Update),
            Action::Delete => Some(Operation::Delete),
            _ => None,
        }
    }
}

/// Log verbosity as accepted on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    /// Level name understood by `tracing_subscriber::EnvFilter`.
    pub fn directive(&self) -> &'static str {
        match self {
            LogLevel::Critical | LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// Top-level CLI structure.
#[derive(Debug, Parser)]
#[command(
    name = "stackglue",
    version,
    about = "Create, update and delete groups of dependent CloudFormation stacks.",
    long_about = "Reads a YAML project file describing CloudFormation stacks, their dependencies and cross-stack parameter references, and applies or deletes them in dependency order using the AWS CLI."
)]
pub struct CliArgs {
    /// Project configuration file.
    #[arg(short = 'y', long = "yamlfile")]
    pub yamlfile: PathBuf,

    /// Action to perform.
    #[arg(short = 'a', long, value_enum)]
    pub action: Action,

    /// Only act on this stack (logical name from the configuration).
    #[arg(short = 's', long)]
    pub stack: Option<String>,

    /// Log level for this tool's messages.
    #[arg(short = 'l', long, value_enum, default_value = "info")]
    pub logging: LogLevel,

    /// Log level for every other crate.
    #[arg(short = 'L', long = "sdk-log", alias = "botolog", value_enum, default_value = "critical")]
    pub sdk_log: LogLevel,

    /// Named AWS profile to use.
    #[arg(short = 'p', long, env = "AWS_PROFILE")]
    pub profile: Option<String>,

    /// Change set name for the change-set actions.
    #[arg(short = 'c', long = "changesetname")]
    pub change_set: Option<String>,

    /// Seconds between stack status polls.
    #[arg(long, default_value_t = 5)]
    pub poll_interval: u64,

    /// Give up waiting on a single stack after this many seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Seconds to pause after each stack update.
    #[arg(long, default_value_t = 2)]
    pub rate_limit_pause: u64,
}

/// Complete configuration for one invocation.
#[derive(Debug, Clone)]
pub struct GlueConfig {
    pub config_path: PathBuf,
    pub action: Action,
    pub stack: Option<String>,
    pub log_level: LogLevel,
    pub sdk_log_level: LogLevel,
    pub profile: Option<String>,
    pub change_set: Option<String>,
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
    pub rate_limit_pause: Duration,
}

impl GlueConfig {
    pub fn from_args(cli: CliArgs) -> Result<Self> {
        if !cli.yamlfile.is_file() {
            return Err(StackGlueError::Config(format!(
                "can't read YAML file {}",
                cli.yamlfile.display()
            )));
        }
        if cli.action.operation().is_none() && (cli.stack.is_none() || cli.change_set.is_none())
        {
            return Err(StackGlueError::Config(format!(
                "action {} requires both --stack and --changesetname",
                cli.action.as_str()
            )));
        }

        Ok(Self {
            config_path: cli.yamlfile,
            action: cli.action,
            stack: cli.stack,
            log_level: cli.logging,
            sdk_log_level: cli.sdk_log,
            profile: cli.profile.filter(|profile| !profile.is_empty()),
            change_set: cli.change_set,
            poll_interval: Duration::from_secs(cli.poll_interval),
            timeout: cli.timeout.map(Duration::from_secs),
            rate_limit_pause: Duration::from_secs(cli.rate_limit_pause),
        })
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            watch: WatchOptions {
                poll_interval: self.poll_interval,
                deadline: self.timeout,
            },
            rate_limit_pause: self.rate_limit_pause,
        }
    }
}
