use std::collections::HashSet;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::error::{Result, StackGlueError};
use crate::provider::{ProvisioningClient, StackEvent, StackStatus};

/// Receives stack events as the watcher discovers them.
pub trait EventSink: Send + Sync {
    fn emit(&self, stack: &str, event: &StackEvent);
}

/// Writes every event to the log at info level.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, stack: &str, event: &StackEvent) {
        info!(stack = %stack, "{event}");
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub poll_interval: Duration,
    /// Upper bound on a single watch; `None` waits indefinitely.
    pub deadline: Option<Duration>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            deadline: None,
        }
    }
}

/// Polls a stack until its status leaves an in-progress set.
pub struct EventWatcher<'a> {
    client: &'a dyn ProvisioningClient,
    sink: &'a dyn EventSink,
    options: WatchOptions,
}

impl<'a> EventWatcher<'a> {
    pub fn new(
        client: &'a dyn ProvisioningClient,
        sink: &'a dyn EventSink,
        options: WatchOptions,
    ) -> Self {
        Self {
            client,
            sink,
            options,
        }
    }

    /// Blocks until `stack` is no longer in one of `in_progress` and returns
    /// the final status, or `GONE` once the engine stops knowing the stack.
    ///
    /// Each tick emits the events that were not part of the previous tick's
    /// log, oldest first. The first tick compares against nothing, so the
    /// existing history is emitted once when the watch starts.
    pub async fn watch(&self, stack: &str, in_progress: &[&str]) -> Result<StackStatus> {
        let started = Instant::now();
        let mut seen: HashSet<String> = HashSet::new();
        let Some(mut status) = self.current_status(stack).await? else {
            return Ok(StackStatus::gone());
        };

        loop {
            let events = self.client.list_stack_events(stack).await?;
            for event in events.iter().filter(|event| !seen.contains(&event.event_id)) {
                self.sink.emit(stack, event);
            }
            seen = events.into_iter().map(|event| event.event_id).collect();

            if !in_progress.contains(&status.as_str()) {
                debug!(stack = %stack, status = %status, "reached terminal status");
                return Ok(status);
            }

            let mut pause = self.options.poll_interval;
            if let Some(deadline) = self.options.deadline {
                let elapsed = started.elapsed();
                if elapsed >= deadline {
                    return Err(StackGlueError::WatchTimeout {
                        stack: stack.to_string(),
                        status: status.to_string(),
                        elapsed,
                    });
                }
                pause = pause.min(deadline - elapsed);
            }
            debug!(stack = %stack, status = %status, wait = ?pause, "waiting for stack");
            sleep(pause).await;

            status = match self.current_status(stack).await? {
                Some(status) => status,
                None => return Ok(StackStatus::gone()),
            };
        }
    }

    async fn current_status(&self, stack: &str) -> Result<Option<StackStatus>> {
        Ok(self
            .client
            .describe_stack(stack)
            .await?
            .map(|description| description.status))
    }
}
