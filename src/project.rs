use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::descriptor::{
    ParameterSource, ParameterSpec, ParameterValue, StackDescriptor, StackReference,
};
use crate::error::{Result, StackGlueError};
use crate::render::ConfigRenderer;

const DEFAULT_ENVIRONMENT: &str = "dev";
const ENVIRONMENT_TAG: &str = "Environment";

/// A validated project configuration.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub environment: String,
    pub region: String,
    /// Enabled stacks in declaration order.
    pub stacks: Vec<StackDescriptor>,
}

#[derive(Debug, Deserialize)]
struct RawProject {
    region: Option<String>,
    environment: Option<String>,
    #[serde(rename = "sns-topic-arn")]
    sns_topic_arn: Option<OneOrMany>,
    #[serde(default)]
    tags: IndexMap<String, Value>,
    #[serde(default)]
    stacks: IndexMap<String, Option<RawStack>>,
}

#[derive(Debug, Deserialize)]
struct RawStack {
    cf_template: Option<String>,
    params: Option<RawParams>,
    depends: Option<Vec<String>>,
    #[serde(default)]
    tags: IndexMap<String, Value>,
    #[serde(rename = "sns-topic-arn")]
    sns_topic_arn: Option<OneOrMany>,
    #[serde(default)]
    disable: bool,
}

/// Parameters keep their declaration order; anything but a mapping is
/// rejected after parsing.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawParams {
    Mapping(IndexMap<String, Value>),
    Other(Value),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(arn) => vec![arn],
            OneOrMany::Many(arns) => arns,
        }
    }
}

impl Project {
    /// Renders `path` against the process environment and parses it.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with(path, &mut ConfigRenderer::from_env())
    }

    pub fn load_with(path: &Path, renderer: &mut ConfigRenderer) -> Result<Self> {
        let text = renderer.render_file(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&text, base_dir)
    }

    /// Parses an already rendered document. Template paths are resolved
    /// against `base_dir`.
    pub fn parse(text: &str, base_dir: &Path) -> Result<Self> {
        let document: IndexMap<String, RawProject> = serde_yaml_bw::from_str(text)?;
        let mut projects = document.into_iter();
        let (name, raw) = match (projects.next(), projects.next()) {
            (Some(project), None) => project,
            (None, _) => {
                return Err(StackGlueError::Config(
                    "configuration does not declare a project".into(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(StackGlueError::Config(
                    "configuration must declare exactly one top-level project".into(),
                ));
            }
        };
        Self::from_raw(name, raw, base_dir)
    }

    fn from_raw(name: String, raw: RawProject, base_dir: &Path) -> Result<Self> {
        let region = raw.region.ok_or_else(|| {
            StackGlueError::Config(format!("project {name} does not specify a region"))
        })?;
        let environment = raw
            .environment
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
            .to_lowercase();
        let project_arns = raw.sns_topic_arn.map(OneOrMany::into_vec).unwrap_or_default();
        check_topic_regions(&project_arns, &region, None)?;
        let project_tags = stringify_map(&raw.tags, &name)?;

        let mut stacks = Vec::with_capacity(raw.stacks.len());
        for (stack_name, stack) in raw.stacks {
            let Some(stack) = stack else {
                return Err(StackGlueError::Config(format!(
                    "stack {stack_name} has no settings, cf_template is required"
                )));
            };
            if stack.disable {
                warn!(stack = %stack_name, "stack is disabled by configuration, skipping");
                continue;
            }
            let descriptor = build_stack(
                &name,
                &environment,
                &region,
                &stack_name,
                stack,
                &project_arns,
                &project_tags,
                base_dir,
            )?;
            debug!(
                stack = %descriptor.name,
                depends_on = ?descriptor.depends_on,
                "loaded stack"
            );
            stacks.push(descriptor);
        }

        Ok(Project {
            name,
            environment,
            region,
            stacks,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn build_stack(
    project: &str,
    environment: &str,
    region: &str,
    name: &str,
    raw: RawStack,
    project_arns: &[String],
    project_tags: &BTreeMap<String, String>,
    base_dir: &Path,
) -> Result<StackDescriptor> {
    let template = raw.cf_template.ok_or_else(|| {
        StackGlueError::Config(format!("stack {name} does not specify a cf_template"))
    })?;
    let template_path: PathBuf = base_dir.join(template);

    let arns = match raw.sns_topic_arn {
        Some(arns) => {
            let arns = arns.into_vec();
            check_topic_regions(&arns, region, Some(name))?;
            arns
        }
        None => project_arns.to_vec(),
    };

    let mut descriptor = StackDescriptor::new(project, environment, name, region, template_path)
        .with_notification_arns(arns);
    if let Some(depends) = raw.depends {
        descriptor = descriptor.with_dependencies(depends);
    }

    let mut tags = project_tags.clone();
    tags.extend(stringify_map(&raw.tags, name)?);
    tags.insert(ENVIRONMENT_TAG.to_string(), environment.to_uppercase());
    descriptor.tags = tags;

    match raw.params {
        None | Some(RawParams::Other(Value::Null)) => {}
        Some(RawParams::Mapping(params)) => {
            for (key, value) in params {
                descriptor.parameters.push(parse_parameter(name, key, &value)?);
            }
        }
        Some(RawParams::Other(_)) => {
            return Err(StackGlueError::Config(format!(
                "parameters for stack {name} must be a mapping"
            )));
        }
    }
    Ok(descriptor)
}

fn check_topic_regions(arns: &[String], region: &str, stack: Option<&str>) -> Result<()> {
    for arn in arns {
        if arn.split(':').nth(3) != Some(region) {
            let owner = stack
                .map(|stack| format!(" for stack {stack}"))
                .unwrap_or_default();
            return Err(StackGlueError::Config(format!(
                "SNS topic '{arn}'{owner} is not in the {region} region"
            )));
        }
    }
    Ok(())
}

fn parse_parameter(stack: &str, key: String, value: &Value) -> Result<ParameterSpec> {
    let (source, use_previous_value) = match value {
        Value::Array(items) => {
            let items = items
                .iter()
                .map(|item| parse_value(stack, &key, item))
                .collect::<Result<Vec<_>>>()?;
            (ParameterSource::List(items), false)
        }
        Value::Object(map) => {
            let use_previous_value = match map.get("usepreviousvalue") {
                None | Some(Value::Null) => false,
                Some(Value::Bool(flag)) => *flag,
                Some(other) => {
                    return Err(StackGlueError::Config(format!(
                        "stack {stack}: usepreviousvalue of parameter {key} must be true or false, got {other}"
                    )));
                }
            };
            (ParameterSource::Single(parse_value(stack, &key, value)?), use_previous_value)
        }
        scalar => (ParameterSource::Single(parse_value(stack, &key, scalar)?), false),
    };
    Ok(ParameterSpec {
        key,
        source,
        use_previous_value,
    })
}

fn parse_value(stack: &str, key: &str, value: &Value) -> Result<ParameterValue> {
    let unparseable =
        || StackGlueError::Config(format!("can't parse parameter {key} for stack {stack}"));
    let Value::Object(map) = value else {
        return scalar(value).map(ParameterValue::Literal).ok_or_else(unparseable);
    };
    if let Some(literal) = map.get("value") {
        return scalar(literal).map(ParameterValue::Literal).ok_or_else(unparseable);
    }
    match (map.get("source"), map.get("type"), map.get("variable")) {
        (Some(source), Some(kind), Some(variable)) => {
            let (Some(source), Some(kind), Some(variable)) =
                (scalar(source), scalar(kind), scalar(variable))
            else {
                return Err(unparseable());
            };
            Ok(ParameterValue::Reference(StackReference {
                source,
                kind: kind.parse()?,
                variable,
            }))
        }
        _ => Err(unparseable()),
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn stringify_map(map: &IndexMap<String, Value>, owner: &str) -> Result<BTreeMap<String, String>> {
    map.iter()
        .map(|(key, value)| {
            scalar(value).map(|value| (key.clone(), value)).ok_or_else(|| {
                StackGlueError::Config(format!("tag {key} of {owner} must be a scalar value"))
            })
        })
        .collect()
}
