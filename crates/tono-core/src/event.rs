//! Engine events
//!
//! A single synchronous callback receives every event, invoked from
//! whichever worker produced it. Per producer the order matches emission;
//! across producers events interleave. Consumers may ignore events entirely
//! and the engine never assumes a handler is configured.

use crate::action::Action;
use crate::resource::{NodeRef, ResourceKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which section of an apply an event belongs to, so UIs can split output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Layered execution of the dependency graph
    Dag,
    /// Reinstalls forced by runtime upgrades
    Taint,
    /// Final removals of no-longer-desired resources
    Remove,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Dag => "dag",
            Phase::Taint => "taint",
            Phase::Remove => "remove",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the engine reports while converging
#[derive(Debug, Clone)]
pub enum Event {
    /// A layer (or phase section) is about to execute. Installer and
    /// installer-repository nodes are excluded from the node lists; they do
    /// not represent observable work.
    LayerStart {
        phase: Phase,
        layer: usize,
        total_layers: usize,
        layer_nodes: Vec<NodeRef>,
        all_layer_nodes: Vec<NodeRef>,
        /// Time since the apply started, for UIs that show section timing
        elapsed_hint: Option<std::time::Duration>,
    },

    /// One unit of installer work is starting
    Start {
        kind: ResourceKind,
        name: String,
        version: String,
        /// Short mechanism label: `download`, `commands`, `go install`, ...
        method: String,
        action: Action,
    },

    /// Byte progress from an installer mid-download
    Progress {
        kind: ResourceKind,
        name: String,
        downloaded: u64,
        total: Option<u64>,
    },

    /// A line of installer stdout/stderr
    Output {
        kind: ResourceKind,
        name: String,
        line: String,
    },

    /// A unit of work finished successfully
    Complete {
        kind: ResourceKind,
        name: String,
        action: Action,
        install_path: Option<String>,
    },

    /// A unit of work failed; the layer keeps draining
    Failed {
        kind: ResourceKind,
        name: String,
        error: String,
    },
}

/// Synchronous event callback
pub type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;

/// Cheap-to-clone wrapper around an optional handler
///
/// Workers hold a sink and call [`EventSink::emit`] without caring whether
/// anyone listens. Embedders can hand a clone to their installers to emit
/// `Progress` and `Output` through the same channel.
#[derive(Clone, Default)]
pub struct EventSink {
    handler: Option<EventHandler>,
}

impl EventSink {
    pub fn new(handler: EventHandler) -> Self {
        Self {
            handler: Some(handler),
        }
    }

    /// A sink that drops every event
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: Event) {
        if let Some(handler) = &self.handler {
            handler(event);
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("configured", &self.handler.is_some())
            .finish()
    }
}
