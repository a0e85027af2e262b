//! Environment-variable templating for the project configuration.
//!
//! The raw document is rendered with Tera before it is parsed, so values such
//! as `{{ AWS_REGION }}` can come from the process environment.

use std::error::Error as _;
use std::fs;
use std::path::Path;

use tera::{Context, Tera};
use tracing::debug;

use crate::error::{Result, StackGlueError};

pub struct ConfigRenderer {
    tera: Tera,
    context: Context,
}

impl ConfigRenderer {
    /// Renderer with no variables defined.
    pub fn empty() -> Self {
        Self {
            tera: Tera::default(),
            context: Context::new(),
        }
    }

    /// Renderer whose context holds every variable of the current process
    /// environment.
    pub fn from_env() -> Self {
        let mut renderer = Self::empty();
        let mut count = 0;
        for (key, value) in std::env::vars() {
            renderer.context.insert(key, &value);
            count += 1;
        }
        debug!(env_var_count = count, "loaded environment into template context");
        renderer
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value: String = value.into();
        self.context.insert(key, &value);
        self
    }

    /// Renders `template`; an undefined variable or bad syntax is a
    /// configuration error.
    pub fn render_str(&mut self, template: &str) -> Result<String> {
        self.tera
            .render_str(template, &self.context)
            .map_err(|err| {
                StackGlueError::Config(format!("cannot render configuration: {}", describe(&err)))
            })
    }

    pub fn render_file(&mut self, path: &Path) -> Result<String> {
        let content = fs::read_to_string(path).map_err(|err| {
            StackGlueError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        self.render_str(&content).map_err(|err| match err {
            StackGlueError::Config(message) => {
                StackGlueError::Config(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }
}

// Tera keeps the useful part of the message (the undefined variable name) in
// the error source chain.
fn describe(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
