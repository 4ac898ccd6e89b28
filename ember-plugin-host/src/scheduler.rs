//! Task-scheduling convenience wrapper
//!
//! Thin surface over a plugin's supervised scope for the common repeating,
//! delayed, and fire-and-forget patterns. Everything submitted here is a
//! child of the scope: it stops when the plugin is disabled and its
//! failures land in the plugin's log.

use crate::supervisor::ScopeContext;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Scheduler bound to one plugin's current execution scope
#[derive(Clone)]
pub struct PluginScheduler {
    scope: Arc<ScopeContext>,
}

impl PluginScheduler {
    pub fn new(scope: Arc<ScopeContext>) -> Self {
        Self { scope }
    }

    /// The scope tasks are submitted to
    pub fn scope(&self) -> &Arc<ScopeContext> {
        &self.scope
    }

    /// Submit a task to the plugin's scope
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.scope.spawn(fut)
    }

    /// Run a task after a delay
    pub fn delayed<F>(&self, delay: Duration, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.scope.spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await
        })
    }

    /// Run a task repeatedly with the given interval between runs
    ///
    /// The interval does not include the task's own run time. The loop
    /// ends when the scope is cancelled or the task returns an error (which
    /// is logged like any other scope failure).
    pub fn repeating<F, Fut>(&self, interval: Duration, mut task: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        self.scope.spawn(async move {
            loop {
                task().await?;
                tokio::time::sleep(interval).await;
            }
        })
    }
}
