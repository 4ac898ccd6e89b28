//! Plugin host: registry plus instances
//!
//! Sequences the whole flow: installing a plugin loads its artifact and
//! resolves its entry symbol through the loader registry, then runs the
//! load hook; enabling runs the enable hook inside a (re)armed scope;
//! uninstalling tears the instance down and evicts its loading context.

use crate::error::LifecycleError;
use crate::instance::PluginInstance;
use crate::platform::{PluginArtifact, SymbolDef};
use crate::registry::LoaderRegistry;
use ember_plugin_api::Plugin;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A long-running process hosting independently compiled plugins
pub struct PluginHost {
    registry: LoaderRegistry,
    instances: RwLock<HashMap<String, Arc<PluginInstance>>>,
    data_root: PathBuf,
}

impl PluginHost {
    /// Create a host; `data_root` is the base directory for per-plugin
    /// data folders
    pub fn new(data_root: impl Into<PathBuf>) -> Result<Self, crate::error::LoaderError> {
        Ok(Self::with_registry(LoaderRegistry::new()?, data_root))
    }

    /// Create a host around an existing registry
    pub fn with_registry(registry: LoaderRegistry, data_root: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            instances: RwLock::new(HashMap::new()),
            data_root: data_root.into(),
        }
    }

    /// The host's loader registry
    pub fn registry(&self) -> &LoaderRegistry {
        &self.registry
    }

    /// Install a plugin: load its artifact, resolve its entry symbol, run
    /// the load hook
    ///
    /// Returns the resolved entry definition on success.
    pub async fn install(
        &self,
        artifact: PluginArtifact,
        plugin: Arc<dyn Plugin>,
    ) -> Result<Arc<SymbolDef>, LifecycleError> {
        let descriptor = plugin.descriptor();
        let name = descriptor.name.clone();
        let entry_symbol = descriptor.entry_symbol.clone();

        // The write lock is held for the whole install so a concurrent
        // install under the same name gets AlreadyInstalled instead of
        // silently overwriting this instance. Installs serialize; lookups
        // and lifecycle calls on other plugins are unaffected.
        let mut instances = self.instances.write().await;
        if instances.contains_key(&name) {
            return Err(LifecycleError::AlreadyInstalled { plugin: name });
        }

        let entry = self.registry.load(&entry_symbol, artifact).await?;

        let instance = Arc::new(PluginInstance::new(plugin, self.data_root.clone()));
        instance.load().await?;
        instances.insert(name, instance);
        Ok(entry)
    }

    /// Enable an installed plugin
    pub async fn enable(&self, name: &str) -> Result<(), LifecycleError> {
        self.instance(name).await?.enable().await
    }

    /// Disable an installed plugin, cancelling its in-flight work
    pub async fn disable(&self, name: &str) -> Result<(), LifecycleError> {
        self.instance(name).await?.disable().await
    }

    /// Uninstall a plugin: terminal unload plus loading-context eviction
    ///
    /// The plugin must not be enabled. The registry's global symbol cache
    /// keeps whatever the plugin contributed (see
    /// [`LoaderRegistry::remove`]).
    pub async fn uninstall(&self, name: &str) -> Result<(), LifecycleError> {
        let instance = self.instance(name).await?;
        instance.unload()?;
        self.instances.write().await.remove(name);
        self.registry.remove(name);
        Ok(())
    }

    /// Look up an installed plugin instance
    pub async fn instance(&self, name: &str) -> Result<Arc<PluginInstance>, LifecycleError> {
        self.instances
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| LifecycleError::NotInstalled {
                plugin: name.to_string(),
            })
    }

    /// Names of installed plugins
    pub async fn plugins(&self) -> Vec<String> {
        self.instances.read().await.keys().cloned().collect()
    }

    /// Disable every enabled plugin and clear the registry
    pub async fn shutdown(&self) {
        let instances: Vec<_> = self.instances.read().await.values().cloned().collect();
        for instance in instances {
            if instance.state() == crate::instance::PluginState::Enabled {
                if let Err(error) = instance.disable().await {
                    tracing::error!(plugin = %instance.name(), %error, "disable during shutdown failed");
                }
            }
        }
        self.instances.write().await.clear();
        self.registry.clear();
        tracing::info!("plugin host shut down");
    }
}
