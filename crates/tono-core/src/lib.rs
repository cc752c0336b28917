//! # tono-core
//!
//! Shared vocabulary for the tono reconciler: the desired-state resource
//! model, the recorded install state, reconciliation actions, engine events,
//! the error taxonomy, and the contracts the engine consumes from the
//! outside (installers and the state store).
//!
//! This crate holds no policy. Deciding what to do with a resource lives in
//! `tono-engine`; ordering lives in `tono-resolver`.

pub mod action;
pub mod error;
pub mod event;
pub mod installer;
pub mod resource;
pub mod state;
pub mod store;

// Re-export the working set so downstream crates can `use tono_core::{..}`.
pub use action::{Action, PlannedAction};
pub use error::{Error, Result};
pub use event::{Event, EventHandler, EventSink, Phase};
pub use installer::{
    InstallerInfo, RepositoryInstaller, RuntimeInfo, RuntimeInstaller, ToolInstaller,
};
pub use resource::{
    ArchiveKind, CommandSet, InstallKind, Installer, InstallerRepository, NodeRef,
    RepositorySource, Resource, ResourceKind, Runtime, SourceSpec, Tool, ToolSet, ToolSetItem,
    VersionKind,
};
pub use state::{
    InstallerRepositoryState, RuntimeState, Taint, TaintReason, ToolState, UserState,
};
pub use store::{MemoryStateStore, StateStore};
