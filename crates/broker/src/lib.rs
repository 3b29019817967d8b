use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use shared::command::{Command, CommandFailure, CommandResult};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

pub mod processors;
pub mod validators;

/// Pre-dispatch check that a candidate command is well formed. Every
/// registered validator runs on every command; all errors are collected,
/// not just the first.
pub trait CommandValidator: Send + Sync {
    fn name(&self) -> &str;
    fn validate(&self, command: &Command) -> Result<(), String>;
}

/// Strategy object that performs the domain-specific part of command
/// handling, e.g. resolving a loose term to a structure id. Selection is
/// first-match-wins in registration order.
#[async_trait]
pub trait CommandProcessor: Send + Sync {
    fn name(&self) -> &str;
    fn can_process(&self, command: &Command) -> bool;
    /// On success returns the (possibly rewritten) command to dispatch.
    async fn process(&self, command: &Command) -> Result<Command, String>;
}

/// Anything able to apply a discrete command to a concrete rendering
/// target: a local 3D engine, a headless test double, a remote mirror.
#[async_trait]
pub trait ViewerAdapter: Send + Sync {
    fn name(&self) -> &str;
    async fn is_ready(&self) -> bool;
    async fn execute(&self, command: &Command) -> anyhow::Result<()>;
}

const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Orchestrates validators -> processor selection -> fan-out to every
/// ready viewer adapter -> history. Nothing here is fatal: every failure
/// mode degrades to a returned [`CommandResult`].
pub struct CommandBroker {
    validators: RwLock<Vec<Arc<dyn CommandValidator>>>,
    processors: RwLock<Vec<Arc<dyn CommandProcessor>>>,
    adapters: RwLock<Vec<Arc<dyn ViewerAdapter>>>,
    history: Mutex<VecDeque<CommandResult>>,
    history_limit: usize,
    queue: Mutex<VecDeque<Command>>,
    draining: AtomicBool,
}

impl Default for CommandBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBroker {
    pub fn new() -> Self {
        Self {
            validators: RwLock::new(Vec::new()),
            processors: RwLock::new(Vec::new()),
            adapters: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            history_limit: DEFAULT_HISTORY_LIMIT,
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        }
    }

    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    pub async fn register_validator(&self, validator: Arc<dyn CommandValidator>) {
        self.validators.write().await.push(validator);
    }

    pub async fn register_processor(&self, processor: Arc<dyn CommandProcessor>) {
        self.processors.write().await.push(processor);
    }

    pub async fn register_viewer(&self, adapter: Arc<dyn ViewerAdapter>) {
        self.adapters.write().await.push(adapter);
    }

    pub async fn unregister_validator(&self, name: &str) -> bool {
        remove_by_name(&mut *self.validators.write().await, |v| v.name() == name)
    }

    pub async fn unregister_processor(&self, name: &str) -> bool {
        remove_by_name(&mut *self.processors.write().await, |p| p.name() == name)
    }

    pub async fn unregister_viewer(&self, name: &str) -> bool {
        remove_by_name(&mut *self.adapters.write().await, |a| a.name() == name)
    }

    /// Runs one command through the full pipeline and returns its result.
    /// Concurrent callers are not serialized; callers that need strict
    /// ordering go through [`execute_queued`](Self::execute_queued).
    pub async fn execute(&self, command: Command) -> CommandResult {
        let validators = self.validators.read().await.clone();
        let errors: Vec<String> = validators
            .iter()
            .filter_map(|validator| validator.validate(&command).err())
            .collect();
        if !errors.is_empty() {
            debug!(command_id = %command.id, ?errors, "command rejected by validators");
            return self
                .record(CommandResult::failed(
                    command,
                    CommandFailure::Validation { errors },
                ))
                .await;
        }

        let processors = self.processors.read().await.clone();
        let Some(processor) = processors
            .iter()
            .find(|processor| processor.can_process(&command))
        else {
            warn!(action = ?command.action, "no processor registered for command");
            let action = command.action;
            return self
                .record(CommandResult::failed(
                    command,
                    CommandFailure::NoProcessor { action },
                ))
                .await;
        };

        let processed = match processor.process(&command).await {
            Ok(processed) => processed,
            Err(message) => {
                debug!(processor = processor.name(), %message, "processor failed");
                return self
                    .record(CommandResult::failed(
                        command,
                        CommandFailure::Processor { message },
                    ))
                    .await;
            }
        };

        self.dispatch(&processed).await;
        self.record(CommandResult::ok(processed)).await
    }

    /// Fire-and-forget path: enqueue and drain strictly FIFO, one command
    /// fully dispatched before the next starts. Whichever caller finds the
    /// queue idle becomes the drainer; everyone else returns immediately.
    pub async fn execute_queued(&self, command: Command) {
        self.queue.lock().await.push_back(command);
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        loop {
            let next = self.queue.lock().await.pop_front();
            match next {
                Some(command) => {
                    let _ = self.execute(command).await;
                }
                None => {
                    self.draining.store(false, Ordering::SeqCst);
                    // A command may have slipped in after the final pop;
                    // re-acquire the drainer role or leave it to the enqueuer.
                    if self.queue.lock().await.is_empty()
                        || self.draining.swap(true, Ordering::SeqCst)
                    {
                        return;
                    }
                }
            }
        }
    }

    /// The only cancellation the queue supports: drop everything pending.
    pub async fn clear_queue(&self) -> usize {
        let mut queue = self.queue.lock().await;
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    pub async fn last_result(&self) -> Option<CommandResult> {
        self.history.lock().await.back().cloned()
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    /// Fan the processed command out to every ready adapter concurrently.
    /// Not-ready adapters are skipped without error (degraded mode), and a
    /// failing adapter never affects its siblings or the overall result.
    async fn dispatch(&self, command: &Command) {
        let adapters = self.adapters.read().await.clone();
        let mut ready = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            if adapter.is_ready().await {
                ready.push(adapter);
            } else {
                debug!(adapter = adapter.name(), "skipping adapter: not ready");
            }
        }

        join_all(ready.iter().map(|adapter| async move {
            if let Err(error) = adapter.execute(command).await {
                warn!(adapter = adapter.name(), %error, "viewer adapter failed");
            }
        }))
        .await;
    }

    async fn record(&self, result: CommandResult) -> CommandResult {
        let mut history = self.history.lock().await;
        history.push_back(result.clone());
        while history.len() > self.history_limit {
            history.pop_front();
        }
        result
    }
}

fn remove_by_name<T: ?Sized>(
    items: &mut Vec<Arc<T>>,
    matches: impl Fn(&Arc<T>) -> bool,
) -> bool {
    let before = items.len();
    items.retain(|item| !matches(item));
    items.len() < before
}

#[cfg(test)]
#[path = "tests/broker_tests.rs"]
mod tests;
