use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::descriptor::StackDescriptor;
use crate::error::{Result, StackGlueError};

/// Orders stacks so every dependency precedes its dependents.
///
/// Kahn's algorithm over qualified names. The frontier is a FIFO queue seeded
/// in declaration order, so stacks without a relationship between them keep
/// the order they were declared in. A dependency on the project name is an
/// edge only when the stack named after the project is declared. Anything
/// left with unresolved edges when the frontier drains is either part of a
/// cycle or depends on a stack that is not declared.
pub fn execution_order(stacks: Vec<StackDescriptor>) -> Result<Vec<StackDescriptor>> {
    ensure_unique(&stacks)?;

    let mut remaining: Vec<Option<Vec<String>>> = {
        let declared: HashSet<&str> = stacks
            .iter()
            .map(|stack| stack.qualified_name.as_str())
            .collect();
        stacks
            .iter()
            .map(|stack| {
                let deps: Vec<String> = stack
                    .effective_dependencies(|name| declared.contains(name))
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                if deps.is_empty() { None } else { Some(deps) }
            })
            .collect()
    };

    let mut frontier: VecDeque<usize> = remaining
        .iter()
        .enumerate()
        .filter(|(_, deps)| deps.is_none())
        .map(|(idx, _)| idx)
        .collect();

    let mut order = Vec::with_capacity(stacks.len());
    while let Some(idx) = frontier.pop_front() {
        order.push(idx);
        let satisfied = &stacks[idx].qualified_name;
        for (other, deps) in remaining.iter_mut().enumerate() {
            let Some(edges) = deps.as_mut() else {
                continue;
            };
            edges.retain(|dep| dep != satisfied);
            if edges.is_empty() {
                debug!(stack = %stacks[other].name, after = %stacks[idx].name, "dependencies resolved");
                *deps = None;
                frontier.push_back(other);
            }
        }
    }

    if order.len() != stacks.len() {
        let stuck = remaining
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_some())
            .map(|(idx, _)| stacks[idx].name.clone())
            .collect();
        return Err(StackGlueError::DependencyCycle { stacks: stuck });
    }

    let mut slots: Vec<Option<StackDescriptor>> = stacks.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|idx| slots[idx].take())
        .collect())
}

fn ensure_unique(stacks: &[StackDescriptor]) -> Result<()> {
    let mut names = HashSet::with_capacity(stacks.len());
    match stacks
        .iter()
        .find(|stack| !names.insert(stack.qualified_name.as_str()))
    {
        Some(duplicate) => Err(StackGlueError::Config(format!(
            "stack name {} is declared more than once",
            duplicate.qualified_name
        ))),
        None => Ok(()),
    }
}
