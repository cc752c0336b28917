//! Reconciliation actions

use crate::resource::ResourceKind;
use crate::state::TaintReason;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed directive produced by comparing a desired resource to its
/// recorded state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Desired but not recorded
    Install,
    /// Recorded but the spec drifted (version or other fields)
    Upgrade,
    /// Spec matches but the state entry is tainted
    Reinstall(TaintReason),
    /// Recorded but no longer desired
    Remove,
    /// Nothing to do
    None,
}

impl Action {
    /// True when the action performs installer work
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Action::None)
    }

    /// True when the action produces (or replaces) a state entry
    pub fn installs(&self) -> bool {
        matches!(self, Action::Install | Action::Upgrade | Action::Reinstall(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Install => "install",
            Action::Upgrade => "upgrade",
            Action::Reinstall(_) => "reinstall",
            Action::Remove => "remove",
            Action::None => "none",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action paired with its target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub kind: ResourceKind,
    pub name: String,
    pub action: Action,
}

impl PlannedAction {
    pub fn new(kind: ResourceKind, name: impl Into<String>, action: Action) -> Self {
        Self {
            kind,
            name: name.into(),
            action,
        }
    }
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.action, self.kind, self.name)
    }
}
