use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::StackGlueError;

/// Builds the globally unique stack name for `name` inside a project.
///
/// A stack named after the project keeps its bare name.
pub fn qualify_name(project: &str, environment: &str, name: &str) -> String {
    if name == project {
        name.to_string()
    } else {
        format!("{project}-{environment}-{name}")
    }
}

/// Which part of a dependency's live state a reference reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Parameter,
    Output,
    Resource,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Parameter => "parameter",
            ReferenceKind::Output => "output",
            ReferenceKind::Resource => "resource",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceKind {
    type Err = StackGlueError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "parameter" => Ok(ReferenceKind::Parameter),
            "output" => Ok(ReferenceKind::Output),
            "resource" => Ok(ReferenceKind::Resource),
            other => Err(StackGlueError::Config(format!(
                "invalid reference type '{other}', needs to be 'parameter', 'output' or 'resource'"
            ))),
        }
    }
}

/// A value read from another stack's live state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackReference {
    /// Logical stack name as written in the configuration.
    pub source: String,
    pub kind: ReferenceKind,
    pub variable: String,
}

/// A single literal or reference value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterValue {
    Literal(String),
    Reference(StackReference),
}

/// Declared shape of one stack parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterSource {
    Single(ParameterValue),
    /// Items are resolved independently and joined with `,`.
    List(Vec<ParameterValue>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub key: String,
    pub source: ParameterSource,
    pub use_previous_value: bool,
}

impl ParameterSpec {
    pub fn literal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            source: ParameterSource::Single(ParameterValue::Literal(value.into())),
            use_previous_value: false,
        }
    }

    pub fn reference(
        key: impl Into<String>,
        source: impl Into<String>,
        kind: ReferenceKind,
        variable: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            source: ParameterSource::Single(ParameterValue::Reference(StackReference {
                source: source.into(),
                kind,
                variable: variable.into(),
            })),
            use_previous_value: false,
        }
    }

    pub fn list(key: impl Into<String>, items: Vec<ParameterValue>) -> Self {
        Self {
            key: key.into(),
            source: ParameterSource::List(items),
            use_previous_value: false,
        }
    }

    pub fn with_previous_value(mut self, use_previous_value: bool) -> Self {
        self.use_previous_value = use_previous_value;
        self
    }
}

/// Parameter ready to be sent with a create or update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedParameter {
    pub key: String,
    pub value: String,
    pub use_previous_value: bool,
}

/// A validated stack definition from the project configuration.
#[derive(Debug, Clone)]
pub struct StackDescriptor {
    pub name: String,
    pub qualified_name: String,
    pub project: String,
    pub environment: String,
    pub region: String,
    /// `None` when the stack declares no `depends` list at all.
    pub depends_on: Option<Vec<String>>,
    pub parameters: Vec<ParameterSpec>,
    pub tags: BTreeMap<String, String>,
    pub notification_arns: Vec<String>,
    pub template_path: PathBuf,
}

impl StackDescriptor {
    pub fn new(
        project: impl Into<String>,
        environment: impl Into<String>,
        name: impl Into<String>,
        region: impl Into<String>,
        template_path: impl Into<PathBuf>,
    ) -> Self {
        let project = project.into();
        let environment = environment.into();
        let name = name.into();
        Self {
            qualified_name: qualify_name(&project, &environment, &name),
            name,
            project,
            environment,
            region: region.into(),
            depends_on: None,
            parameters: Vec::new(),
            tags: BTreeMap::new(),
            notification_arns: Vec::new(),
            template_path: template_path.into(),
        }
    }

    /// Declares dependencies by logical name; they are stored qualified.
    pub fn with_dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let deps = names
            .into_iter()
            .map(|dep| self.qualify(dep.as_ref()))
            .collect();
        self.depends_on = Some(deps);
        self
    }

    pub fn with_parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_notification_arns(mut self, arns: Vec<String>) -> Self {
        self.notification_arns = arns;
        self
    }

    /// Qualifies another logical stack name within this stack's project.
    pub fn qualify(&self, name: &str) -> String {
        qualify_name(&self.project, &self.environment, name)
    }

    /// Dependency names that must exist before this stack is touched.
    ///
    /// A dependency on the project name refers to the stack named after the
    /// project. It only counts when `declared` reports that stack as part of
    /// the set, and never for that stack itself.
    pub fn effective_dependencies<F>(&self, declared: F) -> Vec<&str>
    where
        F: Fn(&str) -> bool,
    {
        self.depends_on
            .iter()
            .flatten()
            .map(String::as_str)
            .filter(|dep| {
                *dep != self.project || (*dep != self.qualified_name && declared(*dep))
            })
            .collect()
    }
}
