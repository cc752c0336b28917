//! Taint policies
//!
//! Two independent mechanisms mark state entries for reinstallation:
//! update-configuration taints run before the DAG phase, and
//! runtime-upgrade taints run after it. Exact-version entries are immune
//! to update policies; marking is idempotent.

use crate::config::UpdateConfig;
use tono_core::{TaintReason, UserState, VersionKind};
use tracing::debug;

fn update_eligible(kind: VersionKind) -> bool {
    matches!(kind, VersionKind::Latest | VersionKind::Alias)
}

/// Apply the update policy to every eligible state entry
///
/// Returns true when at least one entry was newly tainted, so the caller
/// knows whether the mutation needs persisting.
pub(crate) fn apply_update_taints(state: &mut UserState, config: &UpdateConfig) -> bool {
    let mut changed = false;

    if config.sync_mode {
        for (name, tool) in state.tools.iter_mut() {
            // Alias tools stay out: their spec pins a channel, not "latest".
            if tool.version_kind == VersionKind::Latest && !tool.taint.tainted {
                tool.taint.mark(TaintReason::SyncUpdate);
                debug!(tool = %name, "tainted by sync mode");
                changed = true;
            }
        }
    }

    if config.update_tools {
        for (name, tool) in state.tools.iter_mut() {
            if update_eligible(tool.version_kind) && !tool.taint.tainted {
                tool.taint.mark(TaintReason::UpdateRequested);
                debug!(tool = %name, "tainted by update request");
                changed = true;
            }
        }
    }

    if config.update_runtimes {
        for (name, runtime) in state.runtimes.iter_mut() {
            if update_eligible(runtime.version_kind) && !runtime.taint.tainted {
                runtime.taint.mark(TaintReason::UpdateRequested);
                debug!(runtime = %name, "tainted by update request");
                changed = true;
            }
        }
    }

    changed
}

/// Taint every tool in state delegated to one of the given runtimes
///
/// Returns the names of the tools now carrying a taint, in map order.
pub(crate) fn taint_dependents(state: &mut UserState, runtimes: &[String]) -> Vec<String> {
    let mut tainted = Vec::new();
    for (name, tool) in state.tools.iter_mut() {
        let depends = tool
            .runtime_ref
            .as_ref()
            .is_some_and(|runtime| runtimes.contains(runtime));
        if depends {
            tool.taint.mark(TaintReason::RuntimeUpgraded);
            debug!(tool = %name, "tainted by runtime upgrade");
            tainted.push(name.clone());
        }
    }
    tainted
}
