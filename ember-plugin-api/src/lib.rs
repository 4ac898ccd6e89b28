//! ember-plugin-api: Shared types for the ember plugin system
//!
//! This crate defines the contract between the host and a plugin: the
//! descriptor a plugin publishes about itself and the lifecycle hooks the
//! host drives. It deliberately contains no loading or scheduling logic;
//! that lives in `ember-plugin-host`.

use serde::{Deserialize, Serialize};

/// API version for compatibility checking
pub const API_VERSION: u32 = 1;

/// Static metadata a plugin publishes to the host
///
/// The `entry_symbol` names the well-known export inside the plugin's
/// compiled artifact that the loader resolves at load time. There is no
/// annotation scanning or reflection; a plugin that does not export this
/// symbol fails to load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// API version this plugin was built against
    pub api_version: u32,

    /// Plugin name (unique within a host, used for routing and data folders)
    pub name: String,

    /// Fully-qualified name of the entry export in the artifact
    pub entry_symbol: String,

    /// Plugin version (semver)
    #[serde(default)]
    pub version: Option<String>,

    /// Plugin author
    #[serde(default)]
    pub author: Option<String>,
}

impl PluginDescriptor {
    /// Create a descriptor for the current API version
    pub fn new(name: impl Into<String>, entry_symbol: impl Into<String>) -> Self {
        Self {
            api_version: API_VERSION,
            name: name.into(),
            entry_symbol: entry_symbol.into(),
            version: None,
            author: None,
        }
    }

    /// Set the plugin version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the plugin author
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// Lifecycle hooks a plugin implements
///
/// The host calls `on_load` exactly once, then `on_enable`/`on_disable` in
/// pairs for as long as the plugin is installed. Hooks run inside the
/// plugin's supervised execution scope; an `Err` from a hook is reported to
/// the plugin's log and never unwinds into the host.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    /// Descriptor for this plugin
    fn descriptor(&self) -> &PluginDescriptor;

    /// Called once, after the plugin's artifact has been loaded and its
    /// entry symbol resolved
    async fn on_load(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called on every enable transition
    async fn on_enable(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called on every disable transition, before the plugin's scope is
    /// cancelled
    async fn on_disable(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
