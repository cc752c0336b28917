//! Engine orchestration
//!
//! Sequencing of an apply: lock and load, expand sugar, guard removals,
//! register installer policies, apply update taints, then run the DAG,
//! Taint, and Remove phases. A failed layer stops DAG progression but the
//! later phases still run; every failure lands in one aggregated error
//! returned at the end.

use crate::config::{EngineConfig, UpdateConfig, clamp_parallelism};
use crate::executor::Executor;
use crate::reconcile::{reconcile_repository, reconcile_runtime, reconcile_tool};
use crate::scheduler::{self, WorkItem};
use crate::taint;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tono_core::{
    Action, Error, Event, EventHandler, EventSink, InstallKind, Installer, InstallerInfo, NodeRef,
    Phase, PlannedAction, RepositoryInstaller, Resource, ResourceKind, Result, Runtime,
    RuntimeInfo, RuntimeInstaller, StateStore, Tool, ToolInstaller, ToolState, UserState,
};
use tono_resolver::{DependencyGraph, Layer, expand_tool_sets};
use tracing::{debug, info, warn};

/// Hook invoked once per apply or plan, after lock and load, with the
/// freshly loaded state; external code uses it to configure the resource
/// loader with registry information. Its error is logged, never fatal.
pub type ResolverConfigurer = Arc<dyn Fn(&UserState) -> anyhow::Result<()> + Send + Sync>;

/// Result of a dry run: every resource diffed, nothing executed
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub runtime_actions: Vec<PlannedAction>,
    pub repository_actions: Vec<PlannedAction>,
    pub tool_actions: Vec<PlannedAction>,
}

impl Plan {
    fn all(&self) -> impl Iterator<Item = &PlannedAction> {
        self.runtime_actions
            .iter()
            .chain(self.repository_actions.iter())
            .chain(self.tool_actions.iter())
    }

    /// Number of entries that would perform installer work
    pub fn total_actions(&self) -> usize {
        self.all().filter(|p| p.action.is_actionable()).count()
    }

    pub fn is_noop(&self) -> bool {
        self.total_actions() == 0
    }
}

/// The reconciliation engine
///
/// Configure with the `set_*` methods before calling [`Engine::apply`];
/// one engine value never runs two applies concurrently.
pub struct Engine {
    tools: Arc<dyn ToolInstaller>,
    runtimes: Arc<dyn RuntimeInstaller>,
    repositories: Arc<dyn RepositoryInstaller>,
    store: Arc<dyn StateStore>,
    config: EngineConfig,
    events: EventSink,
    configurer: Option<ResolverConfigurer>,
}

impl Engine {
    pub fn new(
        tools: Arc<dyn ToolInstaller>,
        runtimes: Arc<dyn RuntimeInstaller>,
        repositories: Arc<dyn RepositoryInstaller>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            tools,
            runtimes,
            repositories,
            store,
            config: EngineConfig::default(),
            events: EventSink::disabled(),
            configurer: None,
        }
    }

    /// Bound on concurrent installer calls; clamped into
    /// `1..=MAX_PARALLELISM`
    pub fn set_parallelism(&mut self, parallelism: usize) {
        self.config.parallelism = clamp_parallelism(parallelism);
    }

    pub fn set_event_handler(&mut self, handler: EventHandler) {
        self.events = EventSink::new(handler);
    }

    pub fn set_update_config(&mut self, update: UpdateConfig) {
        self.config.update = update;
    }

    pub fn set_resolver_configurer(&mut self, configurer: ResolverConfigurer) {
        self.configurer = Some(configurer);
    }

    /// Sink clone for embedders that want their installers to emit
    /// progress and output events through the engine's handler
    pub fn event_sink(&self) -> EventSink {
        self.events.clone()
    }

    /// Converge the machine toward the desired resource set
    ///
    /// Blocks until every phase has drained. The state lock is held for
    /// the whole call.
    pub async fn apply(&self, token: CancellationToken, resources: Vec<Resource>) -> Result<()> {
        self.store.lock().await?;
        let result = self.apply_locked(&token, resources).await;
        if let Err(err) = self.store.unlock().await {
            warn!(error = %err, "failed to release state lock");
        }
        result
    }

    /// Diff the desired set against recorded state without executing
    ///
    /// The lock is taken for the diff and released before returning.
    pub async fn plan(&self, token: CancellationToken, resources: Vec<Resource>) -> Result<Plan> {
        self.store.lock().await?;
        let result = self.plan_locked(&token, resources).await;
        if let Err(err) = self.store.unlock().await {
            warn!(error = %err, "failed to release state lock");
        }
        result
    }

    async fn apply_locked(
        &self,
        token: &CancellationToken,
        resources: Vec<Resource>,
    ) -> Result<()> {
        let started = Instant::now();
        let mut state = self.store.load().await?;
        self.configure_resolver(&state);

        let resources = expand_tool_sets(resources)?;
        removal_guard(&resources, &state)?;

        let mut failures: Vec<Error> = Vec::new();

        // Installer policies must be visible before any delegated install.
        let installers = installer_index(&resources);
        for (name, installer) in &installers {
            self.tools
                .register_installer(name, InstallerInfo::from_resource(installer));
        }

        if taint::apply_update_taints(&mut state, &self.config.update) {
            if let Err(err) = self.store.save(&state).await {
                warn!(error = %err, "failed to persist update taints");
                failures.push(err);
            }
        }

        let graph = DependencyGraph::build(&resources)?;
        let layers = executable_layers(graph.resolve()?);

        let runtime_index = runtime_index(&resources);
        let state = Arc::new(Mutex::new(state));
        let executor = Arc::new(Executor {
            tools: self.tools.clone(),
            runtimes: self.runtimes.clone(),
            repositories: self.repositories.clone(),
            store: self.store.clone(),
            state: state.clone(),
            events: self.events.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism));

        let mut upgraded_runtimes: Vec<String> = Vec::new();

        // Runtimes already on the machine are usable from the first layer.
        self.register_runtimes(&*state.lock().await);

        // ---- DAG phase
        let total_layers = layers.len();
        let all_layer_nodes: Vec<NodeRef> = layers.iter().flat_map(observable_nodes).collect();
        for (layer_index, layer) in layers.iter().enumerate() {
            if token.is_cancelled() {
                break;
            }
            self.events.emit(Event::LayerStart {
                phase: Phase::Dag,
                layer: layer_index,
                total_layers,
                layer_nodes: observable_nodes(layer),
                all_layer_nodes: all_layer_nodes.clone(),
                elapsed_hint: Some(started.elapsed()),
            });

            let items = {
                let state = state.lock().await;
                plan_layer(layer, &installers, &state)
            };
            debug!(layer = layer_index, actions = items.len(), "layer planned");
            let report = scheduler::run_layer(&executor, &semaphore, token, items).await;

            for (node, action) in &report.succeeded {
                if node.kind == ResourceKind::Runtime
                    && action.installs()
                    && runtime_index
                        .get(&node.name)
                        .is_some_and(|runtime| runtime.taint_on_upgrade)
                {
                    upgraded_runtimes.push(node.name.clone());
                }
            }

            let layer_failed = !report.errors.is_empty();
            failures.extend(report.errors);

            // Reload so installs performed by this layer (and anything an
            // external store merged) are visible to the next one.
            *state.lock().await = self.store.load().await?;
            self.register_runtimes(&*state.lock().await);

            if layer_failed {
                warn!(layer = layer_index, "layer failed, stopping dag progression");
                break;
            }
        }

        // ---- Taint phase
        if !upgraded_runtimes.is_empty() {
            let tainted = {
                let mut guard = state.lock().await;
                let tainted = taint::taint_dependents(&mut guard, &upgraded_runtimes);
                if !tainted.is_empty() {
                    if let Err(err) = self.store.save(&guard).await {
                        warn!(error = %err, "failed to persist runtime-upgrade taints");
                        failures.push(err);
                    }
                }
                tainted
            };
            if !tainted.is_empty() {
                info!(tools = ?tainted, "reinstalling tools tainted by runtime upgrades");
                *state.lock().await = self.store.load().await?;
                let items = {
                    let guard = state.lock().await;
                    plan_taint_reinstalls(&resources, &installers, &guard)
                };
                if !items.is_empty() {
                    let nodes: Vec<NodeRef> = items.iter().map(|i| i.node.clone()).collect();
                    self.events.emit(Event::LayerStart {
                        phase: Phase::Taint,
                        layer: 0,
                        total_layers: 1,
                        layer_nodes: nodes.clone(),
                        all_layer_nodes: nodes,
                        elapsed_hint: Some(started.elapsed()),
                    });
                    let report = scheduler::run_layer(&executor, &semaphore, token, items).await;
                    failures.extend(report.errors);
                }
            }
        }

        // ---- Remove phase
        {
            let removals = {
                let guard = state.lock().await;
                plan_removals(&resources, &installers, &guard)
            };
            if !removals.is_empty() {
                let guard_result = removal_guard(&resources, &*state.lock().await);
                match guard_result {
                    Err(err) => failures.push(err),
                    Ok(()) => {
                        let nodes: Vec<NodeRef> = removals
                            .iter()
                            .map(|i| i.node.clone())
                            .filter(|n| {
                                matches!(n.kind, ResourceKind::Runtime | ResourceKind::Tool)
                            })
                            .collect();
                        self.events.emit(Event::LayerStart {
                            phase: Phase::Remove,
                            layer: 0,
                            total_layers: 1,
                            layer_nodes: nodes.clone(),
                            all_layer_nodes: nodes,
                            elapsed_hint: Some(started.elapsed()),
                        });
                        // Tools release their runtimes first; repositories
                        // sit in between.
                        for batch in split_removals(removals) {
                            let report =
                                scheduler::run_layer(&executor, &semaphore, token, batch).await;
                            failures.extend(report.errors);
                        }
                    }
                }
            }
        }

        if token.is_cancelled() {
            failures.push(Error::Cancelled);
        }
        match Error::aggregate(failures) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn plan_locked(
        &self,
        token: &CancellationToken,
        resources: Vec<Resource>,
    ) -> Result<Plan> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut state = self.store.load().await?;
        self.configure_resolver(&state);

        let resources = expand_tool_sets(resources)?;
        removal_guard(&resources, &state)?;

        // Predict update taints in memory only; a plan never persists.
        taint::apply_update_taints(&mut state, &self.config.update);

        let mut plan = Plan::default();
        let mut desired_runtimes = BTreeSet::new();
        let mut desired_tools = BTreeSet::new();
        let mut desired_repositories = BTreeSet::new();

        for resource in &resources {
            match resource {
                Resource::Runtime(runtime) => {
                    desired_runtimes.insert(runtime.name.clone());
                    plan.runtime_actions.push(PlannedAction::new(
                        ResourceKind::Runtime,
                        &runtime.name,
                        reconcile_runtime(Some(runtime), state.runtimes.get(&runtime.name)),
                    ));
                }
                Resource::Tool(tool) => {
                    desired_tools.insert(tool.name.clone());
                    plan.tool_actions.push(PlannedAction::new(
                        ResourceKind::Tool,
                        &tool.name,
                        reconcile_tool(Some(tool), state.tools.get(&tool.name)),
                    ));
                }
                Resource::InstallerRepository(repository) => {
                    desired_repositories.insert(repository.name.clone());
                    plan.repository_actions.push(PlannedAction::new(
                        ResourceKind::InstallerRepository,
                        &repository.name,
                        reconcile_repository(
                            Some(repository),
                            state.repositories.get(&repository.name),
                        ),
                    ));
                }
                Resource::Installer(_) | Resource::ToolSet(_) => {}
            }
        }

        for name in state.runtimes.keys() {
            if !desired_runtimes.contains(name) {
                plan.runtime_actions.push(PlannedAction::new(
                    ResourceKind::Runtime,
                    name,
                    Action::Remove,
                ));
            }
        }
        for name in state.tools.keys() {
            if !desired_tools.contains(name) {
                plan.tool_actions
                    .push(PlannedAction::new(ResourceKind::Tool, name, Action::Remove));
            }
        }
        for name in state.repositories.keys() {
            if !desired_repositories.contains(name) {
                plan.repository_actions.push(PlannedAction::new(
                    ResourceKind::InstallerRepository,
                    name,
                    Action::Remove,
                ));
            }
        }

        Ok(plan)
    }

    fn configure_resolver(&self, state: &UserState) {
        if let Some(configure) = &self.configurer {
            if let Err(err) = configure(state) {
                warn!(error = %err, "resolver configurer failed");
            }
        }
    }

    fn register_runtimes(&self, state: &UserState) {
        for (name, runtime_state) in &state.runtimes {
            self.tools
                .register_runtime(name, RuntimeInfo::from_state(runtime_state));
        }
    }
}

// ---- planning helpers

fn installer_index(resources: &[Resource]) -> BTreeMap<String, Installer> {
    resources
        .iter()
        .filter_map(|resource| match resource {
            Resource::Installer(installer) => Some((installer.name.clone(), installer.clone())),
            _ => None,
        })
        .collect()
}

fn runtime_index(resources: &[Resource]) -> BTreeMap<String, Runtime> {
    resources
        .iter()
        .filter_map(|resource| match resource {
            Resource::Runtime(runtime) => Some((runtime.name.clone(), runtime.clone())),
            _ => None,
        })
        .collect()
}

/// Strip phantom and installer nodes, then drop layers with nothing left
/// to execute
fn executable_layers(layers: Vec<Layer>) -> Vec<Layer> {
    layers
        .into_iter()
        .map(|mut layer| {
            layer.nodes.retain(|node| {
                !node.is_phantom() && node.node.kind != ResourceKind::Installer
            });
            layer
        })
        .filter(|layer| !layer.nodes.is_empty())
        .collect()
}

/// Nodes reported in layer-start events; installer repositories perform
/// work but are not listed
fn observable_nodes(layer: &Layer) -> Vec<NodeRef> {
    layer
        .nodes
        .iter()
        .filter(|node| matches!(node.node.kind, ResourceKind::Runtime | ResourceKind::Tool))
        .map(|node| node.node.clone())
        .collect()
}

fn plan_layer(
    layer: &Layer,
    installers: &BTreeMap<String, Installer>,
    state: &UserState,
) -> Vec<WorkItem> {
    let mut items = Vec::new();
    for node in &layer.nodes {
        let Some(resource) = &node.resource else {
            continue;
        };
        let item = match resource {
            Resource::Runtime(runtime) => WorkItem {
                node: node.node.clone(),
                action: reconcile_runtime(Some(runtime), state.runtimes.get(&runtime.name)),
                resource: Some(resource.clone()),
                version: runtime.version.clone(),
                method: runtime_method(runtime),
                group: String::new(),
            },
            Resource::Tool(tool) => WorkItem {
                node: node.node.clone(),
                action: reconcile_tool(Some(tool), state.tools.get(&tool.name)),
                resource: Some(resource.clone()),
                version: tool.version.clone(),
                method: tool_method(tool, installers),
                group: delegation_key(tool, installers),
            },
            Resource::InstallerRepository(repository) => WorkItem {
                node: node.node.clone(),
                action: reconcile_repository(
                    Some(repository),
                    state.repositories.get(&repository.name),
                ),
                resource: Some(resource.clone()),
                version: repository.source.url.clone(),
                method: format!("{} repo", repository.installer_ref),
                group: String::new(),
            },
            Resource::Installer(_) | Resource::ToolSet(_) => continue,
        };
        if item.action.is_actionable() {
            items.push(item);
        }
    }
    items
}

/// Tools whose taint survived into the current state become reinstall
/// items; anything else is left for the phases that own it
fn plan_taint_reinstalls(
    resources: &[Resource],
    installers: &BTreeMap<String, Installer>,
    state: &UserState,
) -> Vec<WorkItem> {
    let mut items = Vec::new();
    for resource in resources {
        let Resource::Tool(tool) = resource else {
            continue;
        };
        let action = reconcile_tool(Some(tool), state.tools.get(&tool.name));
        if matches!(action, Action::Reinstall(_)) {
            items.push(WorkItem {
                node: NodeRef::new(ResourceKind::Tool, &tool.name),
                action,
                resource: Some(resource.clone()),
                version: tool.version.clone(),
                method: tool_method(tool, installers),
                group: delegation_key(tool, installers),
            });
        }
    }
    items
}

/// State entries absent from the desired set, ordered tools, then
/// repositories, then runtimes
fn plan_removals(
    resources: &[Resource],
    installers: &BTreeMap<String, Installer>,
    state: &UserState,
) -> Vec<WorkItem> {
    let mut desired: BTreeSet<NodeRef> = BTreeSet::new();
    for resource in resources {
        desired.insert(resource.node_ref());
    }

    let mut items = Vec::new();
    for (name, tool_state) in &state.tools {
        if !desired.contains(&NodeRef::new(ResourceKind::Tool, name)) {
            items.push(WorkItem {
                node: NodeRef::new(ResourceKind::Tool, name),
                action: Action::Remove,
                resource: None,
                version: tool_state.version.clone(),
                method: recorded_tool_method(tool_state, installers),
                group: recorded_delegation_key(tool_state, installers),
            });
        }
    }
    for (name, repository_state) in &state.repositories {
        if !desired.contains(&NodeRef::new(ResourceKind::InstallerRepository, name)) {
            items.push(WorkItem {
                node: NodeRef::new(ResourceKind::InstallerRepository, name),
                action: Action::Remove,
                resource: None,
                version: repository_state.url.clone(),
                method: format!("{} repo", repository_state.installer_ref),
                group: String::new(),
            });
        }
    }
    for (name, runtime_state) in &state.runtimes {
        if !desired.contains(&NodeRef::new(ResourceKind::Runtime, name)) {
            items.push(WorkItem {
                node: NodeRef::new(ResourceKind::Runtime, name),
                action: Action::Remove,
                resource: None,
                version: runtime_state.version.clone(),
                method: match runtime_state.kind {
                    InstallKind::Download => "download".to_string(),
                    InstallKind::Delegation => "commands".to_string(),
                },
                group: String::new(),
            });
        }
    }
    items
}

/// Split removal items into sequential batches: tools, repositories,
/// runtimes
fn split_removals(items: Vec<WorkItem>) -> Vec<Vec<WorkItem>> {
    let mut tools = Vec::new();
    let mut repositories = Vec::new();
    let mut runtimes = Vec::new();
    for item in items {
        match item.node.kind {
            ResourceKind::Tool => tools.push(item),
            ResourceKind::InstallerRepository => repositories.push(item),
            _ => runtimes.push(item),
        }
    }
    [tools, repositories, runtimes]
        .into_iter()
        .filter(|batch| !batch.is_empty())
        .collect()
}

/// No desired tool may still delegate to a runtime that is about to be
/// removed; removing a runtime together with all of its tools is fine
fn removal_guard(resources: &[Resource], state: &UserState) -> Result<()> {
    let desired_runtimes: BTreeSet<&str> = resources
        .iter()
        .filter_map(|resource| match resource {
            Resource::Runtime(runtime) => Some(runtime.name.as_str()),
            _ => None,
        })
        .collect();

    for runtime_name in state.runtimes.keys() {
        if desired_runtimes.contains(runtime_name.as_str()) {
            continue;
        }
        for resource in resources {
            if let Resource::Tool(tool) = resource {
                if tool.runtime_ref.as_deref() == Some(runtime_name.as_str()) {
                    return Err(Error::DependencyRemaining {
                        runtime: runtime_name.clone(),
                        tool: tool.name.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn runtime_method(runtime: &Runtime) -> String {
    match runtime.kind {
        InstallKind::Download => "download".to_string(),
        InstallKind::Delegation => "commands".to_string(),
    }
}

fn tool_method(tool: &Tool, installers: &BTreeMap<String, Installer>) -> String {
    if let Some(runtime) = &tool.runtime_ref {
        return format!("{runtime} install");
    }
    if let Some(installer) = &tool.installer_ref {
        return match installers.get(installer) {
            Some(policy) if policy.kind == InstallKind::Delegation => {
                format!("{installer} install")
            }
            _ => "download".to_string(),
        };
    }
    if tool.source.is_some() {
        "download".to_string()
    } else {
        "commands".to_string()
    }
}

/// Delegation key: tools sharing a non-empty key never run concurrently
fn delegation_key(tool: &Tool, installers: &BTreeMap<String, Installer>) -> String {
    if let Some(runtime) = &tool.runtime_ref {
        return format!("runtime:{runtime}");
    }
    if let Some(installer) = &tool.installer_ref {
        if installers
            .get(installer)
            .is_some_and(|policy| policy.kind == InstallKind::Delegation)
        {
            return format!("installer:{installer}");
        }
    }
    String::new()
}

fn recorded_tool_method(state: &ToolState, installers: &BTreeMap<String, Installer>) -> String {
    if let Some(runtime) = &state.runtime_ref {
        return format!("{runtime} install");
    }
    if let Some(installer) = &state.installer_ref {
        return match installers.get(installer) {
            Some(policy) if policy.kind == InstallKind::Delegation => {
                format!("{installer} install")
            }
            _ => "download".to_string(),
        };
    }
    if state.source_url.is_some() {
        "download".to_string()
    } else {
        "commands".to_string()
    }
}

fn recorded_delegation_key(
    state: &ToolState,
    installers: &BTreeMap<String, Installer>,
) -> String {
    if let Some(runtime) = &state.runtime_ref {
        return format!("runtime:{runtime}");
    }
    if let Some(installer) = &state.installer_ref {
        if installers
            .get(installer)
            .is_some_and(|policy| policy.kind == InstallKind::Delegation)
        {
            return format!("installer:{installer}");
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_guard_names_both_parties() {
        let mut state = UserState::default();
        state.runtimes.insert("go".to_string(), Default::default());
        let resources = vec![Resource::Tool(Tool::new("gopls", "0.16.0").with_runtime("go"))];

        let err = removal_guard(&resources, &state).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot remove runtime \"go\": tool \"gopls\" depends on runtime \"go\""
        );
    }

    #[test]
    fn test_removal_guard_allows_joint_removal() {
        let mut state = UserState::default();
        state.runtimes.insert("go".to_string(), Default::default());
        state.tools.insert(
            "gopls".to_string(),
            ToolState {
                runtime_ref: Some("go".to_string()),
                ..Default::default()
            },
        );

        // Neither go nor gopls is desired; both go together.
        assert!(removal_guard(&[], &state).is_ok());
    }

    #[test]
    fn test_delegation_key_selection() {
        let mut installers = BTreeMap::new();
        installers.insert(
            "helm".to_string(),
            Installer::new("helm", InstallKind::Delegation),
        );
        installers.insert(
            "aqua".to_string(),
            Installer::new("aqua", InstallKind::Download),
        );

        let delegated = Tool::new("gopls", "0.16.0").with_runtime("go");
        assert_eq!(delegation_key(&delegated, &installers), "runtime:go");

        let helm_tool = Tool::new("kube-state-metrics", "5.15.2").with_installer("helm");
        assert_eq!(delegation_key(&helm_tool, &installers), "installer:helm");

        // Download installers and unknown installers impose no ordering.
        let aqua_tool = Tool::new("jq", "1.7.1").with_installer("aqua");
        assert_eq!(delegation_key(&aqua_tool, &installers), "");
        let unknown = Tool::new("fd", "10.2.0").with_installer("ghost");
        assert_eq!(delegation_key(&unknown, &installers), "");
    }

    #[test]
    fn test_tool_method_labels() {
        let mut installers = BTreeMap::new();
        installers.insert(
            "helm".to_string(),
            Installer::new("helm", InstallKind::Delegation),
        );

        assert_eq!(
            tool_method(&Tool::new("gopls", "0.16.0").with_runtime("go"), &installers),
            "go install"
        );
        assert_eq!(
            tool_method(
                &Tool::new("kube-state-metrics", "5.15.2").with_installer("helm"),
                &installers
            ),
            "helm install"
        );
        assert_eq!(
            tool_method(&Tool::new("jq", "1.7.1"), &installers),
            "commands"
        );
    }
}
