//! Recorded install state
//!
//! State entities mirror resources with the details recorded at install
//! time. The engine loads them from the store under a lock, mutates them in
//! memory as actions complete, and saves after every action so partial
//! progress survives failures.

use crate::resource::{InstallKind, VersionKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Why a state entry was marked for reinstallation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaintReason {
    /// A runtime this entry depends on was upgraded
    RuntimeUpgraded,
    /// Sync mode requested every `latest` tool be refreshed
    SyncUpdate,
    /// An explicit update run requested it
    UpdateRequested,
}

/// Reinstallation mark on a state entry
///
/// Ephemeral: cleared when the entry is successfully reinstalled. Marking is
/// idempotent; the first reason wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub tainted: bool,
    pub reason: Option<TaintReason>,
}

impl Taint {
    pub fn mark(&mut self, reason: TaintReason) {
        if !self.tainted {
            self.tainted = true;
            self.reason = Some(reason);
        }
    }

    pub fn clear(&mut self) {
        self.tainted = false;
        self.reason = None;
    }

    /// Reason carried into a reinstall action; `UpdateRequested` when a
    /// legacy state file has the flag without a reason
    pub fn reason(&self) -> TaintReason {
        self.reason.unwrap_or(TaintReason::UpdateRequested)
    }
}

/// Recorded state of an installed runtime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeState {
    pub version: String,
    pub version_kind: VersionKind,
    pub spec_version: String,
    pub kind: InstallKind,
    pub install_path: String,
    pub bin_path: String,
    pub tool_bin_path: Option<String>,
    pub env: BTreeMap<String, String>,
    pub binaries: Vec<String>,
    pub taint: Taint,
}

/// Recorded state of an installed tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolState {
    pub version: String,
    pub version_kind: VersionKind,
    pub spec_version: String,
    pub install_path: String,
    pub bin_path: Option<String>,

    // References recorded at install time; taint propagation and removal
    // guards read them back from state, not from the desired set.
    pub runtime_ref: Option<String>,
    pub installer_ref: Option<String>,

    pub package: Option<String>,
    pub source_url: Option<String>,
    pub taint: Taint,
}

/// Recorded state of a registered installer repository
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerRepositoryState {
    pub installer_ref: String,
    pub kind: String,
    pub url: String,
    pub taint: Taint,
}

/// Everything the engine persists between runs
///
/// Three maps keyed by name plus an opaque registry blob handed to the
/// external resolver configurer. BTreeMaps keep iteration (and the saved
/// file) deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    #[serde(default)]
    pub runtimes: BTreeMap<String, RuntimeState>,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolState>,
    #[serde(default)]
    pub repositories: BTreeMap<String, InstallerRepositoryState>,
    /// Opaque to the core; owned by the external resolver configurer
    #[serde(default)]
    pub registry: serde_json::Value,
}
