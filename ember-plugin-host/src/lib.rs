//! ember-plugin-host: plugin host runtime for ember
//!
//! Loads independently compiled plugin artifacts, resolves named symbols
//! within and across plugins with two-level caching, and supervises each
//! plugin's execution scope so that disabling one plugin tears down its
//! in-flight work without touching the others.

pub mod context;
pub mod error;
pub mod host;
pub mod instance;
pub mod platform;
pub mod registry;
pub mod scheduler;
pub mod supervisor;

pub use context::ModuleLoadingContext;
pub use error::{LifecycleError, LoaderError};
pub use host::PluginHost;
pub use instance::{PluginInstance, PluginState};
pub use platform::{LoaderProfile, PlatformContext, PlatformLoader, PluginArtifact, SymbolDef};
pub use registry::LoaderRegistry;
pub use scheduler::PluginScheduler;
pub use supervisor::{ExecutionSupervisor, ScopeContext};
pub use ember_plugin_api::{Plugin, PluginDescriptor, API_VERSION};
