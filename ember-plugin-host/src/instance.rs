//! Plugin instance lifecycle
//!
//! Ties one plugin to its execution supervisor and walks it through
//! `Constructed -> Loaded -> Enabled <-> Disabled -> Unloaded`. `Loaded`
//! happens once, enable/disable may cycle, `Unloaded` is terminal. Hook
//! failures are reported to the plugin's log and never cross into the
//! host; only invalid transitions are returned as errors.

use crate::error::LifecycleError;
use crate::scheduler::PluginScheduler;
use crate::supervisor::{ExecutionSupervisor, ScopeContext};
use ember_plugin_api::Plugin;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

/// Lifecycle state of a plugin instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Constructed,
    Loaded,
    Enabled,
    Disabled,
    Unloaded,
}

impl PluginState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Constructed => "constructed",
            Self::Loaded => "loaded",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Unloaded => "unloaded",
        }
    }
}

/// A hosted plugin with its supervised execution scope
pub struct PluginInstance {
    plugin: Arc<dyn Plugin>,
    name: String,
    supervisor: ExecutionSupervisor,
    state: Mutex<PluginState>,
    data_root: PathBuf,
    data_folder: OnceLock<PathBuf>,
}

impl PluginInstance {
    /// Wrap a plugin; `data_root` is the host-wide base for plugin data
    /// folders
    pub fn new(plugin: Arc<dyn Plugin>, data_root: PathBuf) -> Self {
        let name = plugin.descriptor().name.clone();
        Self {
            plugin,
            supervisor: ExecutionSupervisor::new(name.clone()),
            name,
            state: Mutex::new(PluginState::Constructed),
            data_root,
            data_folder: OnceLock::new(),
        }
    }

    /// Plugin name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The plugin implementation
    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    /// Current lifecycle state
    pub fn state(&self) -> PluginState {
        *self.state.lock().unwrap()
    }

    /// The instance's execution supervisor
    pub fn supervisor(&self) -> &ExecutionSupervisor {
        &self.supervisor
    }

    /// Current execution scope
    pub fn scope(&self) -> Arc<ScopeContext> {
        self.supervisor.context()
    }

    /// Scheduler bound to the current execution scope
    pub fn scheduler(&self) -> PluginScheduler {
        PluginScheduler::new(self.scope())
    }

    /// Plugin-name-scoped data directory, created on first access
    pub fn data_folder(&self) -> std::io::Result<PathBuf> {
        if let Some(path) = self.data_folder.get() {
            return Ok(path.clone());
        }
        let path = self.data_root.join(&self.name);
        std::fs::create_dir_all(&path)?;
        // A concurrent first access may have set it already; both computed
        // the same path.
        let _ = self.data_folder.set(path.clone());
        Ok(path)
    }

    /// Run the load hook; `Constructed -> Loaded`, exactly once
    pub async fn load(&self) -> Result<(), LifecycleError> {
        self.transition(PluginState::Constructed, PluginState::Loaded)?;
        if let Err(error) = self.plugin.on_load().await {
            tracing::error!(plugin = %self.name, error = %format!("{error:#}"), "on_load hook failed");
        } else {
            tracing::info!(plugin = %self.name, "plugin loaded");
        }
        Ok(())
    }

    /// Run the enable hook inside a (re)armed scope
    pub async fn enable(&self) -> Result<(), LifecycleError> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                PluginState::Loaded | PluginState::Disabled => *state = PluginState::Enabled,
                from => {
                    return Err(LifecycleError::InvalidTransition {
                        plugin: self.name.clone(),
                        from: from.name(),
                        to: PluginState::Enabled.name(),
                    })
                }
            }
        }

        if let Err(error) = self.supervisor.on_enable(self.plugin.as_ref()).await {
            tracing::error!(plugin = %self.name, error = %format!("{error:#}"), "on_enable hook failed");
        } else {
            tracing::info!(plugin = %self.name, "plugin enabled");
        }
        Ok(())
    }

    /// Run the disable hook, then cancel the scope
    pub async fn disable(&self) -> Result<(), LifecycleError> {
        self.transition(PluginState::Enabled, PluginState::Disabled)?;

        if let Err(error) = self.supervisor.on_disable(self.plugin.as_ref()).await {
            tracing::error!(plugin = %self.name, error = %format!("{error:#}"), "on_disable hook failed");
        } else {
            tracing::info!(plugin = %self.name, "plugin disabled");
        }
        Ok(())
    }

    /// Mark the instance unloaded (terminal)
    ///
    /// Only valid from `Loaded` or `Disabled`; an enabled plugin must be
    /// disabled first.
    pub fn unload(&self) -> Result<(), LifecycleError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            PluginState::Loaded | PluginState::Disabled => {
                *state = PluginState::Unloaded;
                tracing::info!(plugin = %self.name, "plugin unloaded");
                Ok(())
            }
            from => Err(LifecycleError::InvalidTransition {
                plugin: self.name.clone(),
                from: from.name(),
                to: PluginState::Unloaded.name(),
            }),
        }
    }

    fn transition(&self, from: PluginState, to: PluginState) -> Result<(), LifecycleError> {
        let mut state = self.state.lock().unwrap();
        if *state != from {
            return Err(LifecycleError::InvalidTransition {
                plugin: self.name.clone(),
                from: state.name(),
                to: to.name(),
            });
        }
        *state = to;
        Ok(())
    }
}
