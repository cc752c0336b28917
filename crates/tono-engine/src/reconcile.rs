//! Pure reconciliation: desired spec vs recorded state
//!
//! One decision table serves every kind; the kinds differ only in how
//! version fields are read and which non-version fields count as drift.
//! Reconciliation performs no I/O and never calls an installer.

use tono_core::{
    Action, InstallerRepository, InstallerRepositoryState, Runtime, RuntimeState, Taint, Tool,
    ToolState, VersionKind,
};

/// Kind-specific field access for the shared decision table
trait Reconcile {
    type Resource;
    type State;

    fn desired_version(resource: &Self::Resource) -> (&str, VersionKind, &str);
    fn recorded_version(state: &Self::State) -> (&str, &str);
    fn taint(state: &Self::State) -> &Taint;

    /// Non-version spec fields that force an upgrade when they differ
    fn drifted(resource: &Self::Resource, state: &Self::State) -> bool;
}

fn decide<R: Reconcile>(desired: Option<&R::Resource>, recorded: Option<&R::State>) -> Action {
    let (resource, state) = match (desired, recorded) {
        (Some(resource), Some(state)) => (resource, state),
        (Some(_), None) => return Action::Install,
        (None, Some(_)) => return Action::Remove,
        (None, None) => return Action::None,
    };

    let (version, version_kind, spec_version) = R::desired_version(resource);
    let (recorded_version, recorded_spec) = R::recorded_version(state);

    if version != recorded_version {
        return Action::Upgrade;
    }
    // An alias channel (`stable`, `lts`) may be re-pointed without the
    // resolved version changing yet; the user-supplied string decides.
    if version_kind == VersionKind::Alias && spec_version != recorded_spec {
        return Action::Upgrade;
    }
    if R::drifted(resource, state) {
        return Action::Upgrade;
    }

    let taint = R::taint(state);
    if taint.tainted {
        return Action::Reinstall(taint.reason());
    }

    Action::None
}

struct RuntimeReconciler;

impl Reconcile for RuntimeReconciler {
    type Resource = Runtime;
    type State = RuntimeState;

    fn desired_version(resource: &Runtime) -> (&str, VersionKind, &str) {
        (&resource.version, resource.version_kind, &resource.spec_version)
    }

    fn recorded_version(state: &RuntimeState) -> (&str, &str) {
        (&state.version, &state.spec_version)
    }

    fn taint(state: &RuntimeState) -> &Taint {
        &state.taint
    }

    fn drifted(resource: &Runtime, state: &RuntimeState) -> bool {
        resource.kind != state.kind
            || resource.env != state.env
            || resource.binaries != state.binaries
            || resource.tool_bin_path != state.tool_bin_path
    }
}

struct ToolReconciler;

impl Reconcile for ToolReconciler {
    type Resource = Tool;
    type State = ToolState;

    fn desired_version(resource: &Tool) -> (&str, VersionKind, &str) {
        (&resource.version, resource.version_kind, &resource.spec_version)
    }

    fn recorded_version(state: &ToolState) -> (&str, &str) {
        (&state.version, &state.spec_version)
    }

    fn taint(state: &ToolState) -> &Taint {
        &state.taint
    }

    fn drifted(resource: &Tool, state: &ToolState) -> bool {
        let source_url = resource.source.as_ref().map(|s| s.url.as_str());
        source_url != state.source_url.as_deref()
            || resource.runtime_ref != state.runtime_ref
            || resource.installer_ref != state.installer_ref
            || resource.package != state.package
    }
}

struct RepositoryReconciler;

impl Reconcile for RepositoryReconciler {
    type Resource = InstallerRepository;
    type State = InstallerRepositoryState;

    fn desired_version(resource: &InstallerRepository) -> (&str, VersionKind, &str) {
        // Repositories are unversioned registrations; the URL stands in so
        // a re-pointed repository reconciles as an upgrade.
        (&resource.source.url, VersionKind::Exact, &resource.source.url)
    }

    fn recorded_version(state: &InstallerRepositoryState) -> (&str, &str) {
        (&state.url, &state.url)
    }

    fn taint(state: &InstallerRepositoryState) -> &Taint {
        &state.taint
    }

    fn drifted(resource: &InstallerRepository, state: &InstallerRepositoryState) -> bool {
        resource.source.kind != state.kind || resource.installer_ref != state.installer_ref
    }
}

/// Decide what to do with one runtime
pub fn reconcile_runtime(desired: Option<&Runtime>, recorded: Option<&RuntimeState>) -> Action {
    decide::<RuntimeReconciler>(desired, recorded)
}

/// Decide what to do with one tool
pub fn reconcile_tool(desired: Option<&Tool>, recorded: Option<&ToolState>) -> Action {
    decide::<ToolReconciler>(desired, recorded)
}

/// Decide what to do with one installer repository
pub fn reconcile_repository(
    desired: Option<&InstallerRepository>,
    recorded: Option<&InstallerRepositoryState>,
) -> Action {
    decide::<RepositoryReconciler>(desired, recorded)
}
