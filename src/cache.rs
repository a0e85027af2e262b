use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::provider::{ProvisioningClient, StackStatus};

/// Everything the engine currently knows about one stack.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveStackState {
    pub name: String,
    pub status: StackStatus,
    pub parameters: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
    /// Logical resource id to physical id.
    pub resources: BTreeMap<String, String>,
    pub template: Value,
}

/// Live state for one orchestration run.
///
/// Both the stack listing and per-stack details are fetched on first use and
/// kept until [`LiveStateCache::invalidate`] drops them after a mutating call.
#[derive(Debug, Default)]
pub struct LiveStateCache {
    snapshot: Option<BTreeSet<String>>,
    states: HashMap<String, Option<LiveStackState>>,
}

impl LiveStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every stack that currently exists.
    pub async fn snapshot(&mut self, client: &dyn ProvisioningClient) -> Result<&BTreeSet<String>> {
        let snapshot = match self.snapshot.take() {
            Some(snapshot) => snapshot,
            None => {
                let listing = client.list_stacks().await?;
                debug!(stacks = listing.len(), "fetched stack listing");
                listing.into_iter().collect()
            }
        };
        Ok(self.snapshot.insert(snapshot))
    }

    pub async fn exists(&mut self, client: &dyn ProvisioningClient, name: &str) -> Result<bool> {
        Ok(self.snapshot(client).await?.contains(name))
    }

    /// Qualified names from `names` that are missing from the listing.
    pub async fn missing<'a>(
        &mut self,
        client: &dyn ProvisioningClient,
        names: &[&'a str],
    ) -> Result<Vec<&'a str>> {
        let snapshot = self.snapshot(client).await?;
        Ok(names
            .iter()
            .copied()
            .filter(|name| !snapshot.contains(*name))
            .collect())
    }

    /// Full live state of `name`, or `None` when the stack does not exist.
    pub async fn get_or_fetch(
        &mut self,
        client: &dyn ProvisioningClient,
        name: &str,
    ) -> Result<Option<&LiveStackState>> {
        if !self.states.contains_key(name) {
            let fetched = Self::fetch(client, name).await?;
            self.states.insert(name.to_string(), fetched);
        }
        Ok(self.states.get(name).and_then(Option::as_ref))
    }

    /// Forgets `name` and the listing so the next query sees fresh state.
    pub fn invalidate(&mut self, name: &str) {
        debug!(stack = %name, "invalidating live state");
        self.states.remove(name);
        self.snapshot = None;
    }

    async fn fetch(client: &dyn ProvisioningClient, name: &str) -> Result<Option<LiveStackState>> {
        let Some(description) = client.describe_stack(name).await? else {
            debug!(stack = %name, "stack does not exist");
            return Ok(None);
        };
        let resources = client
            .list_stack_resources(name)
            .await?
            .into_iter()
            .filter_map(|resource| resource.physical_id.map(|id| (resource.logical_id, id)))
            .collect();
        let template = client.get_template(name).await?;
        debug!(stack = %name, status = %description.status, "fetched live state");
        Ok(Some(LiveStackState {
            name: description.name,
            status: description.status,
            parameters: description.parameters,
            outputs: description.outputs,
            resources,
            template,
        }))
    }
}
