//! Per-plugin execution-context supervisor
//!
//! Every plugin instance owns a supervised execution scope: a cancellation
//! token plus a task tracker. Work scheduled on behalf of the plugin runs
//! under the scope; disabling the plugin cancels the scope cooperatively,
//! and a fresh scope is built on the next enable so continuations from a
//! previous cycle can never leak forward. One child task failing never
//! cancels its siblings; failures are routed to the plugin's log instead
//! of propagating to the host.

use ember_plugin_api::Plugin;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// One armed execution scope
///
/// Recreated (never reused) on every enable cycle after the first; the
/// first enable reuses the scope built on first access. `generation`
/// distinguishes scopes across cycles.
pub struct ScopeContext {
    plugin: String,
    generation: u64,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ScopeContext {
    /// Monotonic build number of this scope within its supervisor
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether scope-wide cancellation has been signalled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the scope is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Signal cooperative cancellation of every child task
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
        self.tracker.close();
    }

    /// Spawn a task under this scope
    ///
    /// The task races the scope's cancellation token, so it stops at its
    /// next await point once the scope is cancelled. An `Err` outcome or a
    /// panic is reported to the plugin's log; neither affects sibling
    /// tasks or the host.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let token = self.cancel.clone();
        let inner = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => Ok(()),
                result = fut => result,
            }
        });

        let plugin = self.plugin.clone();
        self.tracker.spawn(async move {
            match inner.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::error!(plugin = %plugin, error = %format!("{error:#}"), "plugin task failed");
                }
                Err(join) if join.is_panic() => {
                    tracing::error!(plugin = %plugin, %join, "plugin task panicked");
                }
                Err(_) => {}
            }
        })
    }

    /// Wait for every task spawned so far to finish
    ///
    /// Only meaningful after the scope has been cancelled (the tracker is
    /// closed then); used by tests and orderly shutdown.
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }
}

/// Supervises the execution scope across a plugin's enable/disable cycles
pub struct ExecutionSupervisor {
    plugin: String,
    /// Current scope; `None` until first access. Readers share the lock,
    /// and the write path only ever holds it for the duration of scope
    /// construction, never while plugin code runs.
    scope: RwLock<Option<Arc<ScopeContext>>>,
    first_run: AtomicBool,
    builds: AtomicU64,
}

impl ExecutionSupervisor {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            scope: RwLock::new(None),
            first_run: AtomicBool::new(true),
            builds: AtomicU64::new(0),
        }
    }

    /// Current scope context, built lazily on first access
    ///
    /// Double-checked: concurrent first access constructs exactly one
    /// scope.
    pub fn context(&self) -> Arc<ScopeContext> {
        if let Some(ctx) = self.scope.read().unwrap().as_ref() {
            return Arc::clone(ctx);
        }

        let mut scope = self.scope.write().unwrap();
        if let Some(ctx) = scope.as_ref() {
            return Arc::clone(ctx);
        }
        let ctx = self.build();
        *scope = Some(Arc::clone(&ctx));
        ctx
    }

    /// Times a scope context has been constructed
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::SeqCst)
    }

    /// Run the plugin's enable hook inside a (re)armed scope
    ///
    /// On every enable after a disable, the previous scope is discarded
    /// and a fresh one built *before* the hook runs, so a disabled
    /// plugin's continuations cannot leak into the new cycle.
    pub async fn on_enable(&self, plugin: &dyn Plugin) -> anyhow::Result<()> {
        if !self.first_run.load(Ordering::SeqCst) {
            let ctx = self.rearm();
            tracing::debug!(
                plugin = %self.plugin,
                generation = ctx.generation(),
                "execution scope rebuilt"
            );
        }
        plugin.on_enable().await
    }

    /// Run the plugin's disable hook, then cancel the scope
    ///
    /// Cancellation is cooperative: children observe it at their next
    /// await point. There is no hard-kill guarantee.
    pub async fn on_disable(&self, plugin: &dyn Plugin) -> anyhow::Result<()> {
        self.first_run.store(false, Ordering::SeqCst);
        let result = plugin.on_disable().await;

        let current = self.scope.read().unwrap().as_ref().map(Arc::clone);
        if let Some(ctx) = current {
            ctx.cancel();
        }
        result
    }

    fn rearm(&self) -> Arc<ScopeContext> {
        let mut scope = self.scope.write().unwrap();
        let ctx = self.build();
        *scope = Some(Arc::clone(&ctx));
        ctx
    }

    fn build(&self) -> Arc<ScopeContext> {
        let generation = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        Arc::new(ScopeContext {
            plugin: self.plugin.clone(),
            generation,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }
}
