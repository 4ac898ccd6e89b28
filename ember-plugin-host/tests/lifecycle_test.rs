//! Plugin lifecycle, supervision, and host end-to-end behavior

use ember_plugin_host::{
    LifecycleError, PluginArtifact, PluginHost, PluginInstance, PluginState,
};
use ember_plugin_api::{Plugin, PluginDescriptor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct CountingPlugin {
    descriptor: PluginDescriptor,
    loads: AtomicUsize,
    enables: AtomicUsize,
    disables: AtomicUsize,
}

impl CountingPlugin {
    fn new(name: &str, entry: &str) -> Arc<Self> {
        Arc::new(Self {
            descriptor: PluginDescriptor::new(name, entry).version("0.1.0"),
            loads: AtomicUsize::new(0),
            enables: AtomicUsize::new(0),
            disables: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl Plugin for CountingPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn on_load(&self) -> anyhow::Result<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_enable(&self) -> anyhow::Result<()> {
        self.enables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_disable(&self) -> anyhow::Result<()> {
        self.disables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn instance(plugin: Arc<CountingPlugin>, dir: &TempDir) -> PluginInstance {
    PluginInstance::new(plugin, dir.path().to_path_buf())
}

#[tokio::test]
async fn hooks_fire_once_per_transition() {
    let dir = TempDir::new().unwrap();
    let plugin = CountingPlugin::new("greeter", "greeter_entry");
    let inst = instance(Arc::clone(&plugin), &dir);

    assert_eq!(inst.state(), PluginState::Constructed);
    inst.load().await.unwrap();
    assert_eq!(inst.state(), PluginState::Loaded);

    inst.enable().await.unwrap();
    inst.disable().await.unwrap();
    inst.enable().await.unwrap();
    inst.disable().await.unwrap();

    assert_eq!(plugin.loads.load(Ordering::SeqCst), 1);
    assert_eq!(plugin.enables.load(Ordering::SeqCst), 2);
    assert_eq!(plugin.disables.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn invalid_transitions_are_rejected() {
    let dir = TempDir::new().unwrap();
    let plugin = CountingPlugin::new("greeter", "greeter_entry");
    let inst = instance(plugin, &dir);

    // Cannot enable before load, cannot load twice, cannot unload while
    // enabled.
    assert!(matches!(
        inst.enable().await,
        Err(LifecycleError::InvalidTransition { .. })
    ));
    inst.load().await.unwrap();
    assert!(matches!(
        inst.load().await,
        Err(LifecycleError::InvalidTransition { .. })
    ));
    inst.enable().await.unwrap();
    assert!(matches!(
        inst.unload(),
        Err(LifecycleError::InvalidTransition { .. })
    ));

    inst.disable().await.unwrap();
    inst.unload().unwrap();
    assert_eq!(inst.state(), PluginState::Unloaded);

    // Unloaded is terminal.
    assert!(matches!(
        inst.enable().await,
        Err(LifecycleError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn reenable_builds_a_fresh_scope() {
    let dir = TempDir::new().unwrap();
    let plugin = CountingPlugin::new("greeter", "greeter_entry");
    let inst = instance(plugin, &dir);
    inst.load().await.unwrap();

    inst.enable().await.unwrap();
    let first_scope = inst.scope();

    // Schedule work that would run for a long time.
    let finished = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&finished);
    inst.scheduler().spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        flag.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    inst.disable().await.unwrap();
    assert!(first_scope.is_cancelled());
    first_scope.wait().await;
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    inst.enable().await.unwrap();
    let second_scope = inst.scope();

    // A genuinely new scope: different generation, not cancelled.
    assert_ne!(first_scope.generation(), second_scope.generation());
    assert!(!second_scope.is_cancelled());

    // Work on the new scope is unaffected by the old cancellation.
    let ran = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&ran);
    let handle = inst.scheduler().spawn(async move {
        flag.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    handle.await.unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn first_enable_reuses_constructed_scope() {
    let dir = TempDir::new().unwrap();
    let plugin = CountingPlugin::new("greeter", "greeter_entry");
    let inst = instance(plugin, &dir);
    inst.load().await.unwrap();

    let before = inst.scope();
    inst.enable().await.unwrap();
    let after = inst.scope();
    assert_eq!(before.generation(), after.generation());
    assert_eq!(inst.supervisor().builds(), 1);
}

#[tokio::test]
async fn data_folder_is_created_on_first_access() {
    let dir = TempDir::new().unwrap();
    let plugin = CountingPlugin::new("greeter", "greeter_entry");
    let inst = instance(plugin, &dir);

    let expected = dir.path().join("greeter");
    assert!(!expected.exists());

    let folder = inst.data_folder().unwrap();
    assert_eq!(folder, expected);
    assert!(expected.is_dir());

    // Stable on repeat access.
    assert_eq!(inst.data_folder().unwrap(), expected);
}

const GREETER_WAT: &str = r#"
    (module
        (func (export "greeter_entry"))
        (func (export "greeter_util")))
"#;

#[tokio::test]
async fn host_install_enable_disable_uninstall() {
    let artifacts = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let host = PluginHost::new(data.path()).unwrap();

    let path = artifacts.path().join("greeter.wat");
    std::fs::write(&path, GREETER_WAT).unwrap();

    let plugin = CountingPlugin::new("greeter", "greeter_entry");
    let entry = host
        .install(
            PluginArtifact::new("greeter", &path),
            Arc::clone(&plugin) as Arc<dyn Plugin>,
        )
        .await
        .unwrap();
    assert_eq!(entry.name(), "greeter_entry");
    assert_eq!(entry.origin(), "greeter");
    assert_eq!(host.plugins().await, vec!["greeter"]);

    // Installing under the same name again is rejected.
    let dup = CountingPlugin::new("greeter", "greeter_entry");
    assert!(matches!(
        host.install(
            PluginArtifact::new("greeter", &path),
            dup as Arc<dyn Plugin>
        )
        .await,
        Err(LifecycleError::AlreadyInstalled { .. })
    ));

    host.enable("greeter").await.unwrap();
    assert_eq!(
        host.instance("greeter").await.unwrap().state(),
        PluginState::Enabled
    );

    // Other plugins can resolve the greeter's symbols while installed.
    assert!(host.registry().resolve_dependency("greeter_util").is_some());

    host.disable("greeter").await.unwrap();
    host.uninstall("greeter").await.unwrap();

    assert!(host.plugins().await.is_empty());
    assert!(!host.registry().contains("greeter"));
    assert_eq!(plugin.loads.load(Ordering::SeqCst), 1);
    assert_eq!(plugin.enables.load(Ordering::SeqCst), 1);
    assert_eq!(plugin.disables.load(Ordering::SeqCst), 1);

    assert!(matches!(
        host.enable("greeter").await,
        Err(LifecycleError::NotInstalled { .. })
    ));
}

#[tokio::test]
async fn concurrent_install_of_same_name_admits_one() {
    let artifacts = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let host = Arc::new(PluginHost::new(data.path()).unwrap());

    let path = artifacts.path().join("greeter.wat");
    std::fs::write(&path, GREETER_WAT).unwrap();

    let plugins: Vec<_> = (0..8)
        .map(|_| CountingPlugin::new("greeter", "greeter_entry"))
        .collect();

    let mut handles = Vec::new();
    for plugin in &plugins {
        let host = Arc::clone(&host);
        let plugin = Arc::clone(plugin);
        let artifact = PluginArtifact::new("greeter", &path);
        handles.push(tokio::spawn(async move {
            host.install(artifact, plugin as Arc<dyn Plugin>).await
        }));
    }

    let mut installed = 0;
    let mut rejected = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => installed += 1,
            Err(LifecycleError::AlreadyInstalled { .. }) => rejected += 1,
            Err(other) => panic!("unexpected install error: {other}"),
        }
    }
    assert_eq!(installed, 1);
    assert_eq!(rejected, 7);

    // The winner's load hook ran exactly once; the losers' never ran.
    let total_loads: usize = plugins
        .iter()
        .map(|p| p.loads.load(Ordering::SeqCst))
        .sum();
    assert_eq!(total_loads, 1);
    assert_eq!(host.plugins().await, vec!["greeter"]);
}

#[tokio::test]
async fn host_install_fails_cleanly_on_missing_entry() {
    let artifacts = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let host = PluginHost::new(data.path()).unwrap();

    let path = artifacts.path().join("greeter.wat");
    std::fs::write(&path, GREETER_WAT).unwrap();

    let plugin = CountingPlugin::new("greeter", "entry_that_is_not_exported");
    let err = host
        .install(
            PluginArtifact::new("greeter", &path),
            Arc::clone(&plugin) as Arc<dyn Plugin>,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Loader(ember_plugin_host::LoaderError::SymbolNotFound { .. })
    ));

    // No instance was installed and the load hook never ran.
    assert!(host.plugins().await.is_empty());
    assert_eq!(plugin.loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disabling_one_plugin_leaves_others_running() {
    let dir = TempDir::new().unwrap();
    let alpha = instance(CountingPlugin::new("alpha", "e"), &dir);
    let beta = instance(CountingPlugin::new("beta", "e"), &dir);
    alpha.load().await.unwrap();
    beta.load().await.unwrap();
    alpha.enable().await.unwrap();
    beta.enable().await.unwrap();

    let beta_ticks = Arc::new(AtomicUsize::new(0));
    let ticks = Arc::clone(&beta_ticks);
    beta.scheduler().repeating(Duration::from_millis(5), move || {
        let ticks = Arc::clone(&ticks);
        async move {
            ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    alpha.disable().await.unwrap();

    let before = beta_ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(beta_ticks.load(Ordering::SeqCst) > before);
    assert!(!beta.scope().is_cancelled());
}
