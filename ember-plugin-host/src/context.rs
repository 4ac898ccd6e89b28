//! Per-plugin module loading context
//!
//! Each loaded plugin owns one [`ModuleLoadingContext`] bound to its
//! artifact. Resolution is local-first: a plugin resolving its own symbols
//! never scans other plugins. Cross-plugin delegation is opt-in via
//! `search_dependencies` and goes through the owning registry, which
//! iterates contexts without recursing back into delegation.

use crate::error::LoaderError;
use crate::platform::{PlatformContext, PluginArtifact, SymbolDef};
use crate::registry::RegistryShared;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// An isolated symbol resolution scope bound to one plugin's artifact
///
/// Owned exclusively by the loader registry; destroyed on unload or
/// registry clear.
pub struct ModuleLoadingContext {
    plugin: String,
    artifact: PluginArtifact,
    /// Local symbol cache. `None` records a negative result so repeated
    /// lookups for names absent from this artifact skip the platform.
    cache: Mutex<HashMap<String, Option<Arc<SymbolDef>>>>,
    platform: Mutex<Option<Box<dyn PlatformContext>>>,
    registry: Weak<RegistryShared>,
}

impl ModuleLoadingContext {
    pub(crate) fn new(
        artifact: PluginArtifact,
        platform: Box<dyn PlatformContext>,
        registry: Weak<RegistryShared>,
    ) -> Self {
        Self {
            plugin: artifact.plugin().to_string(),
            artifact,
            cache: Mutex::new(HashMap::new()),
            platform: Mutex::new(Some(platform)),
            registry,
        }
    }

    /// Name of the plugin this context belongs to
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// The artifact this context is bound to
    pub fn artifact(&self) -> &PluginArtifact {
        &self.artifact
    }

    /// Resolve a symbol name within this context
    ///
    /// Lookup order: local cache (a positive hit short-circuits), then
    /// registry delegation when `search_dependencies` is set, then the
    /// platform context. Platform results are stored in the local cache and
    /// published to the registry's global cache; platform misses are
    /// negative-cached locally so later lookups skip the platform, though
    /// they may still succeed through delegation.
    ///
    /// With `search_dependencies = false` this never returns a definition
    /// originating from another plugin's artifact, regardless of what the
    /// global cache holds.
    pub fn resolve(
        &self,
        name: &str,
        search_dependencies: bool,
    ) -> Result<Arc<SymbolDef>, LoaderError> {
        // A negative entry only records that this artifact lacks the name;
        // it skips the platform lookup below, never delegation.
        let known_missing_locally = match self.cache.lock().unwrap().get(name) {
            Some(Some(def)) => return Ok(Arc::clone(def)),
            Some(None) => true,
            None => false,
        };

        if search_dependencies {
            if let Some(registry) = self.registry.upgrade() {
                if let Some(def) = registry.resolve_dependency(name) {
                    self.cache
                        .lock()
                        .unwrap()
                        .insert(name.to_string(), Some(Arc::clone(&def)));
                    return Ok(def);
                }
            }
        }

        if known_missing_locally {
            return Err(LoaderError::not_found(&self.plugin, name));
        }

        // The platform lock is never held while a cache lock is held, and
        // vice versa; a slow artifact must not stall unrelated lookups.
        let looked_up = {
            let platform = self.platform.lock().unwrap();
            platform.as_ref().and_then(|p| p.lookup(name))
        };

        match looked_up {
            Some(ty) => {
                let def = Arc::new(SymbolDef::new(&self.plugin, name, ty));
                if let Some(registry) = self.registry.upgrade() {
                    // First writer wins globally; this context still keeps
                    // (and returns) its own definition.
                    registry.publish(Arc::clone(&def));
                }
                self.cache
                    .lock()
                    .unwrap()
                    .insert(name.to_string(), Some(Arc::clone(&def)));
                Ok(def)
            }
            None => {
                self.cache.lock().unwrap().insert(name.to_string(), None);
                Err(LoaderError::not_found(&self.plugin, name))
            }
        }
    }

    /// Release the platform context and clear the local cache
    ///
    /// Idempotent; only the first call reaches the platform.
    pub fn close(&self) -> Result<(), LoaderError> {
        let handle = self.platform.lock().unwrap().take();
        self.cache.lock().unwrap().clear();

        if let Some(mut platform) = handle {
            platform
                .close()
                .map_err(|source| LoaderError::ContextCloseFailure {
                    plugin: self.plugin.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}
