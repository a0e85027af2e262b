use tracing_subscriber::EnvFilter;

use crate::config::GlueConfig;
use crate::error::{Result, StackGlueError};

const CRATE_TARGET: &str = "stackglue";

/// Installs the global fmt subscriber on stderr.
///
/// `RUST_LOG` wins when set; otherwise `--logging` applies to this crate and
/// `--sdk-log` to everything else.
pub fn init(config: &GlueConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(directives(config))
            .map_err(|err| StackGlueError::Telemetry(err.to_string()))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| StackGlueError::Telemetry(err.to_string()))
}

fn directives(config: &GlueConfig) -> String {
    format!(
        "{},{CRATE_TARGET}={}",
        config.sdk_log_level.directive(),
        config.log_level.directive()
    )
}
