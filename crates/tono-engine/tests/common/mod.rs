//! Shared test doubles for the engine suites
//!
//! One mock backend implements all three installer contracts, records
//! every call, tracks concurrency high-water marks, and can be told to
//! fail, stall, or rendezvous on a barrier for specific names.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;
use tono_core::{
    Error, Event, EventHandler, InstallerInfo, InstallerRepository, InstallerRepositoryState,
    MemoryStateStore, RepositoryInstaller, Result, Runtime, RuntimeInfo, RuntimeInstaller,
    RuntimeState, Tool, ToolInstaller, ToolState, UserState,
};
use tono_engine::Engine;

/// Mock backend shared across the three installer roles
#[derive(Default)]
pub struct MockInstaller {
    calls: Mutex<Vec<String>>,
    in_flight: Mutex<BTreeSet<String>>,
    /// For every call start: (label, everything else in flight right then)
    overlaps: Mutex<Vec<(String, Vec<String>)>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    fail_installs: Mutex<BTreeSet<String>>,
    fail_removes: Mutex<BTreeSet<String>>,
    delay: Mutex<Option<Duration>>,
    barrier: Mutex<Option<(Arc<Barrier>, BTreeSet<String>)>>,
    registered_runtimes: Mutex<Vec<String>>,
    registered_installers: Mutex<Vec<(String, InstallerInfo)>>,
}

impl MockInstaller {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make installs of `name` fail
    pub fn fail_install(&self, name: &str) {
        self.fail_installs.lock().unwrap().insert(name.to_string());
    }

    /// Make removals of `name` fail
    pub fn fail_remove(&self, name: &str) {
        self.fail_removes.lock().unwrap().insert(name.to_string());
    }

    /// Hold every call open for a while so overlap is observable
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Calls for the given names rendezvous on the barrier mid-install;
    /// the test deadlocks (and times out) unless they can overlap
    pub fn set_barrier(&self, barrier: Arc<Barrier>, names: &[&str]) {
        let names = names.iter().map(|n| n.to_string()).collect();
        *self.barrier.lock().unwrap() = Some((barrier, names));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of simultaneously running installer calls seen
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// For every start of `label`, what else was mid-install at that moment
    pub fn overlaps_of(&self, label: &str) -> Vec<Vec<String>> {
        self.overlaps
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| l == label)
            .map(|(_, others)| others.clone())
            .collect()
    }

    pub fn registered_runtimes(&self) -> Vec<String> {
        self.registered_runtimes.lock().unwrap().clone()
    }

    pub fn registered_installers(&self) -> Vec<(String, InstallerInfo)> {
        self.registered_installers.lock().unwrap().clone()
    }

    async fn simulate(&self, label: String, name: &str, token: &CancellationToken) -> Result<()> {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let others: Vec<String> = in_flight.iter().cloned().collect();
            self.overlaps.lock().unwrap().push((label.clone(), others));
            in_flight.insert(label.clone());
        }
        self.calls.lock().unwrap().push(label.clone());
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let barrier = {
            let guard = self.barrier.lock().unwrap();
            guard.as_ref().and_then(|(barrier, names)| {
                names.contains(name).then(|| barrier.clone())
            })
        };
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.in_flight.lock().unwrap().remove(&label);

        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let failing = (label.starts_with("install")
            && self.fail_installs.lock().unwrap().contains(name))
            || (label.starts_with("remove") && self.fail_removes.lock().unwrap().contains(name));
        if failing {
            return Err(Error::Other(anyhow::anyhow!("backend refused {name}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ToolInstaller for MockInstaller {
    async fn install(
        &self,
        token: CancellationToken,
        tool: &Tool,
        name: &str,
    ) -> Result<ToolState> {
        self.simulate(format!("install tool/{name}"), name, &token)
            .await?;
        Ok(tool_state(tool))
    }

    async fn remove(&self, token: CancellationToken, _state: &ToolState, name: &str) -> Result<()> {
        self.simulate(format!("remove tool/{name}"), name, &token)
            .await
    }

    fn register_runtime(&self, name: &str, _info: RuntimeInfo) {
        self.registered_runtimes.lock().unwrap().push(name.to_string());
    }

    fn register_installer(&self, name: &str, info: InstallerInfo) {
        self.registered_installers
            .lock()
            .unwrap()
            .push((name.to_string(), info));
    }
}

#[async_trait]
impl RuntimeInstaller for MockInstaller {
    async fn install(
        &self,
        token: CancellationToken,
        runtime: &Runtime,
        name: &str,
    ) -> Result<RuntimeState> {
        self.simulate(format!("install runtime/{name}"), name, &token)
            .await?;
        Ok(runtime_state(runtime))
    }

    async fn remove(
        &self,
        token: CancellationToken,
        _state: &RuntimeState,
        name: &str,
    ) -> Result<()> {
        self.simulate(format!("remove runtime/{name}"), name, &token)
            .await
    }
}

#[async_trait]
impl RepositoryInstaller for MockInstaller {
    async fn install(
        &self,
        token: CancellationToken,
        repository: &InstallerRepository,
        name: &str,
    ) -> Result<InstallerRepositoryState> {
        self.simulate(format!("install repository/{name}"), name, &token)
            .await?;
        Ok(repository_state(repository))
    }

    async fn remove(
        &self,
        token: CancellationToken,
        _state: &InstallerRepositoryState,
        name: &str,
    ) -> Result<()> {
        self.simulate(format!("remove repository/{name}"), name, &token)
            .await
    }
}

/// The state a well-behaved backend would record for a tool
pub fn tool_state(tool: &Tool) -> ToolState {
    ToolState {
        version: tool.version.clone(),
        version_kind: tool.version_kind,
        spec_version: tool.spec_version.clone(),
        install_path: format!("/opt/tono/tools/{}", tool.name),
        bin_path: Some(format!("/opt/tono/tools/{}/bin", tool.name)),
        runtime_ref: tool.runtime_ref.clone(),
        installer_ref: tool.installer_ref.clone(),
        package: tool.package.clone(),
        source_url: tool.source.as_ref().map(|s| s.url.clone()),
        ..Default::default()
    }
}

/// The state a well-behaved backend would record for a runtime
pub fn runtime_state(runtime: &Runtime) -> RuntimeState {
    RuntimeState {
        version: runtime.version.clone(),
        version_kind: runtime.version_kind,
        spec_version: runtime.spec_version.clone(),
        kind: runtime.kind,
        install_path: format!("/opt/tono/runtimes/{}", runtime.name),
        bin_path: format!("/opt/tono/runtimes/{}/bin", runtime.name),
        tool_bin_path: runtime.tool_bin_path.clone(),
        env: runtime.env.clone(),
        binaries: runtime.binaries.clone(),
        ..Default::default()
    }
}

pub fn repository_state(repository: &InstallerRepository) -> InstallerRepositoryState {
    InstallerRepositoryState {
        installer_ref: repository.installer_ref.clone(),
        kind: repository.source.kind.clone(),
        url: repository.source.url.clone(),
        ..Default::default()
    }
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Engine wired to one mock playing all three installer roles
pub fn engine(installer: &Arc<MockInstaller>, store: &Arc<MemoryStateStore>) -> Engine {
    init_tracing();
    Engine::new(
        installer.clone(),
        installer.clone(),
        installer.clone(),
        store.clone(),
    )
}

/// Event handler that appends into a shared log
pub fn event_log() -> (EventHandler, Arc<Mutex<Vec<Event>>>) {
    let log: Arc<Mutex<Vec<Event>>> = Arc::default();
    let sink = log.clone();
    let handler: EventHandler = Arc::new(move |event| {
        sink.lock().unwrap().push(event);
    });
    (handler, log)
}

/// Store pre-populated with the given entries
pub fn seeded_store(
    runtimes: Vec<(&str, RuntimeState)>,
    tools: Vec<(&str, ToolState)>,
) -> Arc<MemoryStateStore> {
    let mut state = UserState::default();
    state.runtimes = runtimes
        .into_iter()
        .map(|(name, rs)| (name.to_string(), rs))
        .collect::<BTreeMap<_, _>>();
    state.tools = tools
        .into_iter()
        .map(|(name, ts)| (name.to_string(), ts))
        .collect::<BTreeMap<_, _>>();
    Arc::new(MemoryStateStore::with_state(state))
}
