//! Installer contracts
//!
//! The engine routes by resource kind, never by installer flavor; concrete
//! backends (downloaders, package-manager drivers, command runners) live
//! outside the core and implement these traits. Every install/remove call
//! receives the caller's cancellation token and is expected to return
//! promptly once it fires.

use crate::error::Result;
use crate::resource::{CommandSet, InstallKind, Installer, InstallerRepository, Runtime, Tool};
use crate::state::{InstallerRepositoryState, RuntimeState, ToolState};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Derived facts about an installed runtime, registered with the tool
/// installer so delegated installs can invoke it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeInfo {
    pub version: String,
    pub bin_path: String,
    pub tool_bin_path: Option<String>,
    pub env: BTreeMap<String, String>,
    pub binaries: Vec<String>,
}

impl RuntimeInfo {
    pub fn from_state(state: &RuntimeState) -> Self {
        Self {
            version: state.version.clone(),
            bin_path: state.bin_path.clone(),
            tool_bin_path: state.tool_bin_path.clone(),
            env: state.env.clone(),
            binaries: state.binaries.clone(),
        }
    }
}

/// Policy extracted from an [`Installer`] resource, registered with the
/// tool installer before execution starts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstallerInfo {
    pub kind: InstallKind,
    pub tool_ref: Option<String>,
    pub commands: Option<CommandSet>,
}

impl InstallerInfo {
    pub fn from_resource(installer: &Installer) -> Self {
        Self {
            kind: installer.kind,
            tool_ref: installer.tool_ref.clone(),
            commands: installer.commands.clone(),
        }
    }
}

/// Installs and removes tools
#[async_trait]
pub trait ToolInstaller: Send + Sync {
    /// Converge one tool; the returned state replaces the map entry
    async fn install(&self, token: CancellationToken, tool: &Tool, name: &str)
        -> Result<ToolState>;

    async fn remove(&self, token: CancellationToken, state: &ToolState, name: &str) -> Result<()>;

    /// Called for every runtime in state after each layer completes, so
    /// delegated installs see runtimes installed earlier in the same apply
    fn register_runtime(&self, name: &str, info: RuntimeInfo);

    /// Called for every installer resource before execution starts
    fn register_installer(&self, name: &str, info: InstallerInfo);
}

/// Installs and removes runtimes
#[async_trait]
pub trait RuntimeInstaller: Send + Sync {
    async fn install(
        &self,
        token: CancellationToken,
        runtime: &Runtime,
        name: &str,
    ) -> Result<RuntimeState>;

    async fn remove(&self, token: CancellationToken, state: &RuntimeState, name: &str)
        -> Result<()>;
}

/// Registers and removes installer repositories
#[async_trait]
pub trait RepositoryInstaller: Send + Sync {
    async fn install(
        &self,
        token: CancellationToken,
        repository: &InstallerRepository,
        name: &str,
    ) -> Result<InstallerRepositoryState>;

    async fn remove(
        &self,
        token: CancellationToken,
        state: &InstallerRepositoryState,
        name: &str,
    ) -> Result<()>;
}
