use tracing::debug;

use crate::cache::{LiveStackState, LiveStateCache};
use crate::descriptor::{
    ParameterSource, ParameterSpec, ParameterValue, ReferenceKind, ResolvedParameter,
    StackDescriptor, StackReference,
};
use crate::error::{Result, StackGlueError};
use crate::provider::ProvisioningClient;

/// Turns a stack's declared parameters into concrete values.
///
/// References read the live state of the source stack through the cache. A
/// missing stack or key is an error; no default is ever substituted.
pub struct ParameterResolver<'a> {
    client: &'a dyn ProvisioningClient,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(client: &'a dyn ProvisioningClient) -> Self {
        Self { client }
    }

    pub async fn resolve(
        &self,
        stack: &StackDescriptor,
        cache: &mut LiveStateCache,
    ) -> Result<Vec<ResolvedParameter>> {
        let mut resolved = Vec::with_capacity(stack.parameters.len());
        for spec in &stack.parameters {
            let value = self.resolve_spec(stack, spec, cache).await?;
            debug!(
                stack = %stack.name,
                parameter = %spec.key,
                value = %value,
                "resolved parameter"
            );
            resolved.push(ResolvedParameter {
                key: spec.key.clone(),
                value,
                use_previous_value: spec.use_previous_value,
            });
        }
        Ok(resolved)
    }

    async fn resolve_spec(
        &self,
        stack: &StackDescriptor,
        spec: &ParameterSpec,
        cache: &mut LiveStateCache,
    ) -> Result<String> {
        match &spec.source {
            ParameterSource::Single(value) => {
                self.resolve_value(stack, &spec.key, value, cache).await
            }
            ParameterSource::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.resolve_value(stack, &spec.key, item, cache).await?);
                }
                Ok(values.join(","))
            }
        }
    }

    async fn resolve_value(
        &self,
        stack: &StackDescriptor,
        parameter: &str,
        value: &ParameterValue,
        cache: &mut LiveStateCache,
    ) -> Result<String> {
        let reference = match value {
            ParameterValue::Literal(literal) => return Ok(literal.clone()),
            ParameterValue::Reference(reference) => reference,
        };
        let source = stack.qualify(&reference.source);
        let fail = |reason: String| StackGlueError::ReferenceResolution {
            stack: stack.name.clone(),
            parameter: parameter.to_string(),
            source_stack: source.clone(),
            kind: reference.kind.to_string(),
            variable: reference.variable.clone(),
            reason,
        };

        let Some(state) = cache.get_or_fetch(self.client, &source).await? else {
            return Err(fail("source stack has not been provisioned".into()));
        };
        lookup(state, reference).ok_or_else(|| {
            fail(format!(
                "no {} named '{}'",
                reference.kind, reference.variable
            ))
        })
    }
}

fn lookup(state: &LiveStackState, reference: &StackReference) -> Option<String> {
    let entries = match reference.kind {
        ReferenceKind::Parameter => &state.parameters,
        ReferenceKind::Output => &state.outputs,
        ReferenceKind::Resource => &state.resources,
    };
    entries.get(&reference.variable).cloned()
}
