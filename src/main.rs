use clap::Parser;
use tracing::error;

use stackglue::{
    StackGlueError, apply,
    config::{CliArgs, GlueConfig},
};

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();
    match GlueConfig::from_args(cli) {
        Ok(config) => match apply::run(config).await {
            Ok(report) => println!("{}", report.summary()),
            Err(err @ StackGlueError::Telemetry(_)) => {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
            Err(err) => {
                error!("{err}");
                std::process::exit(1);
            }
        },
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    }
}
