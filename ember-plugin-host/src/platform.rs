//! Platform loader adapter over wasmtime
//!
//! Wraps the host platform's ability to load a compiled artifact and
//! resolve named symbols (module exports) within it. Two engine profiles
//! exist: a general profile for server-class hosts and a constrained
//! profile (fuel-metered, capped stack) for embedded/mobile hosts. The
//! adapter picks one transparently; callers only ever see the
//! [`PlatformContext`] seam.

use crate::error::LoaderError;
use std::path::{Path, PathBuf};
use wasmtime::{Config, Engine, ExternType, Module};

/// Immutable reference to a plugin's compiled artifact on durable storage
#[derive(Debug, Clone)]
pub struct PluginArtifact {
    plugin: String,
    path: PathBuf,
}

impl PluginArtifact {
    /// Create an artifact reference for the named plugin
    pub fn new(plugin: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            plugin: plugin.into(),
            path: path.into(),
        }
    }

    /// Name of the plugin that owns this artifact
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Path to the compiled artifact
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A resolved symbol definition
///
/// Definitions are shared behind `Arc`, and the caches guarantee that a
/// name resolves to the identical definition for the life of the registry.
/// `Arc::ptr_eq` is the identity test.
#[derive(Debug)]
pub struct SymbolDef {
    origin: String,
    name: String,
    ty: ExternType,
}

impl SymbolDef {
    pub(crate) fn new(origin: impl Into<String>, name: impl Into<String>, ty: ExternType) -> Self {
        Self {
            origin: origin.into(),
            name: name.into(),
            ty,
        }
    }

    /// Name of the plugin whose artifact defines this symbol
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The symbol name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The export's type as reported by the platform loader
    pub fn ty(&self) -> &ExternType {
        &self.ty
    }
}

/// One plugin's platform loading context
///
/// Bound to a single artifact; resolves symbol names defined inside it.
/// This is a trait seam rather than a concrete platform type so the
/// registry can compose contexts (and tests can inject faulty ones)
/// without subclassing anything platform-specific.
pub trait PlatformContext: Send + Sync {
    /// Resolve a symbol name to its export type, if the artifact defines it
    fn lookup(&self, name: &str) -> Option<ExternType>;

    /// Release the platform resources backing this context
    ///
    /// Called at most once by the owning loading context.
    fn close(&mut self) -> anyhow::Result<()>;
}

/// Engine profile selected by the platform adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderProfile {
    /// Default limits, suitable for server-class hosts
    General,
    /// Fuel metering and a capped compilation stack for constrained hosts
    Constrained,
}

impl LoaderProfile {
    /// Pick the profile for the current host platform
    pub fn detect() -> Self {
        if cfg!(any(target_os = "android", target_os = "ios")) {
            Self::Constrained
        } else {
            Self::General
        }
    }
}

/// Platform loader: produces a [`PlatformContext`] per artifact
pub struct PlatformLoader {
    engine: Engine,
    profile: LoaderProfile,
}

impl PlatformLoader {
    /// Create a loader with the profile detected for this host
    pub fn new() -> Result<Self, LoaderError> {
        Self::with_profile(LoaderProfile::detect())
    }

    /// Create a loader with an explicit profile
    pub fn with_profile(profile: LoaderProfile) -> Result<Self, LoaderError> {
        let mut config = Config::new();
        config.wasm_memory64(false);

        if let LoaderProfile::Constrained = profile {
            config.consume_fuel(true);
            config.max_wasm_stack(1024 * 1024);
        }

        let engine = Engine::new(&config).map_err(LoaderError::Init)?;

        Ok(Self { engine, profile })
    }

    /// The profile this loader was built with
    pub fn profile(&self) -> LoaderProfile {
        self.profile
    }

    /// Compile an artifact's bytes into a loading context
    ///
    /// Compilation is the expensive, potentially blocking step; callers
    /// must not hold any cache lock across it.
    pub fn open(
        &self,
        artifact: &PluginArtifact,
        bytes: &[u8],
    ) -> Result<Box<dyn PlatformContext>, LoaderError> {
        let module = Module::new(&self.engine, bytes).map_err(|e| LoaderError::LoadFailure {
            plugin: artifact.plugin().to_string(),
            source: e,
        })?;

        Ok(Box::new(ModuleContext {
            module: Some(module),
        }))
    }
}

/// Platform context backed by a compiled wasmtime module
struct ModuleContext {
    // `None` after close; compiled code is released on drop
    module: Option<Module>,
}

impl PlatformContext for ModuleContext {
    fn lookup(&self, name: &str) -> Option<ExternType> {
        self.module.as_ref()?.get_export(name)
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.module.take();
        Ok(())
    }
}
