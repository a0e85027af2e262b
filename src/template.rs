use std::fs;
use std::path::PathBuf;

use serde_json::Value;

use crate::descriptor::StackDescriptor;
use crate::error::{Result, StackGlueError};

/// A stack's template document, parsed from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateDocument {
    pub path: PathBuf,
    pub document: Value,
}

impl TemplateDocument {
    pub fn load(stack: &StackDescriptor) -> Result<Self> {
        let path = stack.template_path.clone();
        let text = fs::read_to_string(&path).map_err(|err| StackGlueError::Template {
            stack: stack.name.clone(),
            path: path.clone(),
            message: err.to_string(),
        })?;
        let document = parse_document(&text).map_err(|message| StackGlueError::Template {
            stack: stack.name.clone(),
            path: path.clone(),
            message,
        })?;
        Ok(Self { path, document })
    }

    /// Canonical request body: object keys sorted, two-space indentation.
    pub fn body(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&canonicalize(&self.document))?)
    }

    /// Structural comparison that ignores key order and formatting.
    pub fn matches(&self, live: &Value) -> bool {
        canonicalize(&self.document) == canonicalize(live)
    }
}

/// Parses a template as JSON, falling back to YAML.
pub fn parse_document(text: &str) -> std::result::Result<Value, String> {
    match serde_json::from_str::<Value>(text) {
        Ok(document) => Ok(document),
        Err(json_err) => serde_yaml_bw::from_str::<Value>(text).map_err(|yaml_err| {
            format!("not valid JSON ({json_err}) nor YAML ({yaml_err})")
        }),
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), canonicalize(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
