//! Error taxonomy for the plugin host
//!
//! Resolution and load errors are returned to the immediate caller;
//! teardown errors are recovered and logged; execution-scope failures are
//! contained at the scope boundary. Nothing in this crate terminates the
//! host process.

use thiserror::Error;

/// Errors surfaced by the loader registry and module loading contexts
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The platform loader itself could not be initialized
    #[error("platform loader initialization failed")]
    Init(#[source] anyhow::Error),

    /// The requested name is absent from the artifact and from every
    /// delegatable context. Non-fatal to the registry.
    #[error("symbol `{symbol}` not found in plugin `{plugin}` or its dependencies")]
    SymbolNotFound { plugin: String, symbol: String },

    /// The platform loader rejected the artifact outright (corrupt or
    /// incompatible binary, I/O fault). Fatal to this plugin's load
    /// attempt only.
    #[error("failed to load artifact for plugin `{plugin}`")]
    LoadFailure {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    /// Releasing a loading context's platform resources failed. Logged
    /// during `clear()`/`remove()`, never aborts the remaining teardown.
    #[error("failed to close loading context for plugin `{plugin}`")]
    ContextCloseFailure {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },
}

impl LoaderError {
    pub(crate) fn not_found(plugin: &str, symbol: &str) -> Self {
        Self::SymbolNotFound {
            plugin: plugin.to_string(),
            symbol: symbol.to_string(),
        }
    }
}

/// Errors from plugin lifecycle transitions
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid lifecycle transition for plugin `{plugin}`: {from} -> {to}")]
    InvalidTransition {
        plugin: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("plugin `{plugin}` is not installed")]
    NotInstalled { plugin: String },

    #[error("plugin `{plugin}` is already installed")]
    AlreadyInstalled { plugin: String },

    #[error(transparent)]
    Loader(#[from] LoaderError),
}
