//! Loader registry with cross-module symbol resolution
//!
//! Process-wide map from plugin name to its module loading context, plus a
//! global symbol cache shared by every context. The registry owns the
//! contexts; plugins only ever see resolved definitions.

use crate::context::ModuleLoadingContext;
use crate::error::LoaderError;
use crate::platform::{PlatformLoader, PluginArtifact, SymbolDef};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// State shared between the registry and its loading contexts
///
/// Contexts hold a `Weak` reference to this for delegated resolution, so
/// the registry remains the sole owner.
pub(crate) struct RegistryShared {
    contexts: Mutex<ContextMap>,
    /// Global symbol cache. Write-once per name: the first resolver to
    /// populate an entry wins, later resolutions are no-ops.
    global: Mutex<HashMap<String, Arc<SymbolDef>>>,
}

/// Insertion-ordered context map, so delegated lookup and bulk clear
/// iterate deterministically for a given startup order.
#[derive(Default)]
struct ContextMap {
    by_name: HashMap<String, Arc<ModuleLoadingContext>>,
    order: Vec<String>,
}

impl ContextMap {
    fn insert(&mut self, ctx: Arc<ModuleLoadingContext>) {
        let name = ctx.plugin().to_string();
        if self.by_name.insert(name.clone(), ctx).is_none() {
            self.order.push(name);
        }
    }

    fn remove(&mut self, name: &str) -> Option<Arc<ModuleLoadingContext>> {
        let ctx = self.by_name.remove(name)?;
        self.order.retain(|n| n != name);
        Some(ctx)
    }

    fn ordered(&self) -> Vec<Arc<ModuleLoadingContext>> {
        self.order
            .iter()
            .filter_map(|n| self.by_name.get(n).cloned())
            .collect()
    }
}

impl RegistryShared {
    fn new() -> Self {
        Self {
            contexts: Mutex::new(ContextMap::default()),
            global: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a context unless one is already registered for the plugin.
    /// Returns the winning context either way.
    fn register(&self, ctx: Arc<ModuleLoadingContext>) -> Arc<ModuleLoadingContext> {
        let mut contexts = self.contexts.lock().unwrap();
        if let Some(existing) = contexts.by_name.get(ctx.plugin()) {
            return Arc::clone(existing);
        }
        contexts.insert(Arc::clone(&ctx));
        ctx
    }

    fn get(&self, plugin: &str) -> Option<Arc<ModuleLoadingContext>> {
        self.contexts.lock().unwrap().by_name.get(plugin).cloned()
    }

    /// Race-safe idempotent global insert; the cached definition wins.
    pub(crate) fn publish(&self, def: Arc<SymbolDef>) -> Arc<SymbolDef> {
        let mut global = self.global.lock().unwrap();
        Arc::clone(global.entry(def.name().to_string()).or_insert(def))
    }

    /// Delegated cross-module resolution
    ///
    /// Global cache first; on miss, each registered context is asked in
    /// registration order *without* recursing into dependency delegation,
    /// which is what breaks delegation cycles.
    pub(crate) fn resolve_dependency(&self, name: &str) -> Option<Arc<SymbolDef>> {
        if let Some(def) = self.global.lock().unwrap().get(name) {
            return Some(Arc::clone(def));
        }

        // Snapshot outside the loop so no registry lock is held while a
        // context touches the platform.
        let contexts = self.contexts.lock().unwrap().ordered();
        for ctx in contexts {
            if let Ok(def) = ctx.resolve(name, false) {
                return Some(self.publish(def));
            }
        }
        None
    }
}

/// The process-wide plugin loader registry
pub struct LoaderRegistry {
    shared: Arc<RegistryShared>,
    loader: Arc<PlatformLoader>,
}

impl LoaderRegistry {
    /// Create a registry with a platform loader for this host
    pub fn new() -> Result<Self, LoaderError> {
        Ok(Self::with_loader(PlatformLoader::new()?))
    }

    /// Create a registry around an existing platform loader
    pub fn with_loader(loader: PlatformLoader) -> Self {
        Self {
            shared: Arc::new(RegistryShared::new()),
            loader: Arc::new(loader),
        }
    }

    /// Load a plugin's artifact and resolve its entry symbol
    ///
    /// Reuses the plugin's loading context if one exists; otherwise reads
    /// and compiles the artifact (no registry lock held across either) and
    /// registers the context first-writer-wins. Fails with
    /// [`LoaderError::SymbolNotFound`] when the artifact lacks the entry
    /// symbol and [`LoaderError::LoadFailure`] for any other platform
    /// fault.
    pub async fn load(
        &self,
        entry_symbol: &str,
        artifact: PluginArtifact,
    ) -> Result<Arc<SymbolDef>, LoaderError> {
        let plugin = artifact.plugin().to_string();

        let ctx = match self.shared.get(&plugin) {
            Some(ctx) => ctx,
            None => {
                let bytes = tokio::fs::read(artifact.path()).await.map_err(|e| {
                    LoaderError::LoadFailure {
                        plugin: plugin.clone(),
                        source: anyhow::Error::new(e)
                            .context(format!("reading artifact {}", artifact.path().display())),
                    }
                })?;
                let platform = self.loader.open(&artifact, &bytes)?;
                let ctx = Arc::new(ModuleLoadingContext::new(
                    artifact,
                    platform,
                    Arc::downgrade(&self.shared),
                ));
                // A racing load for the same plugin keeps the first
                // context; ours is dropped.
                self.shared.register(ctx)
            }
        };

        let entry = ctx.resolve(entry_symbol, false)?;
        tracing::info!(plugin = %plugin, entry = %entry_symbol, "plugin artifact loaded");
        Ok(entry)
    }

    /// Resolve a symbol across all registered contexts
    ///
    /// Returns `None` if no context defines the name. Never fails, and on
    /// an empty registry never does any platform work.
    pub fn resolve_dependency(&self, name: &str) -> Option<Arc<SymbolDef>> {
        self.shared.resolve_dependency(name)
    }

    /// Get the loading context registered for a plugin
    pub fn context(&self, plugin: &str) -> Option<Arc<ModuleLoadingContext>> {
        self.shared.get(plugin)
    }

    /// Close and evict a plugin's loading context
    ///
    /// Returns `false` if no context is registered under the name. Close
    /// failures are logged, not raised. Global-cache entries contributed by
    /// the plugin are deliberately kept: resolution stability is favored
    /// over memory reclaim, and stale entries after an unload are a
    /// documented limitation.
    pub fn remove(&self, plugin: &str) -> bool {
        let removed = self.shared.contexts.lock().unwrap().remove(plugin);
        match removed {
            Some(ctx) => {
                if let Err(error) = ctx.close() {
                    tracing::error!(plugin = %plugin, %error, "failed to close loading context");
                }
                tracing::info!(plugin = %plugin, "loading context removed");
                true
            }
            None => false,
        }
    }

    /// Close every context and clear the global cache
    ///
    /// Individual close failures are logged and collected so one broken
    /// context cannot block teardown of the rest.
    pub fn clear(&self) {
        let contexts = {
            let mut map = self.shared.contexts.lock().unwrap();
            let ordered = map.ordered();
            map.by_name.clear();
            map.order.clear();
            ordered
        };

        let mut failures = 0usize;
        for ctx in contexts {
            if let Err(error) = ctx.close() {
                failures += 1;
                tracing::error!(plugin = %ctx.plugin(), %error, "failed to close loading context");
            }
        }
        self.shared.global.lock().unwrap().clear();

        if failures > 0 {
            tracing::warn!(failures, "registry cleared with close failures");
        } else {
            tracing::info!("registry cleared");
        }
    }

    /// Registered plugin names in registration order
    pub fn plugins(&self) -> Vec<String> {
        self.shared.contexts.lock().unwrap().order.clone()
    }

    /// Whether a context is registered for the plugin
    pub fn contains(&self, plugin: &str) -> bool {
        self.shared
            .contexts
            .lock()
            .unwrap()
            .by_name
            .contains_key(plugin)
    }

    /// Number of registered contexts
    pub fn len(&self) -> usize {
        self.shared.contexts.lock().unwrap().by_name.len()
    }

    /// Whether the registry has no contexts
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn register_for_test(&self, ctx: ModuleLoadingContext) {
        self.shared.register(Arc::new(ctx));
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<RegistryShared> {
        &self.shared
    }
}
