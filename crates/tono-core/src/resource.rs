//! Desired-state resource model
//!
//! A user declares a set of resources; the engine converges the machine
//! toward it. Five kinds exist: runtimes, tools, installers, installer
//! repositories, and tool sets (sugar that expands to tools before
//! resolution).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Closed set of resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Runtime,
    Tool,
    Installer,
    InstallerRepository,
    ToolSet,
}

impl ResourceKind {
    /// Short lowercase label used in error messages and events
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Runtime => "runtime",
            ResourceKind::Tool => "tool",
            ResourceKind::Installer => "installer",
            ResourceKind::InstallerRepository => "installer-repository",
            ResourceKind::ToolSet => "tool-set",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a user pinned a version
///
/// `Exact` versions are never touched by update policies. `Latest` and
/// `Alias` (a named channel such as `stable`) are eligible for update and
/// sync taints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum VersionKind {
    #[default]
    Exact,
    Latest,
    Alias,
}

/// How a resource gets onto the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InstallKind {
    /// Fetched as an artifact (archive or raw binary)
    #[default]
    Download,
    /// Installed by invoking another tool (`go install`, `pnpm add`, ...)
    Delegation,
}

/// Identity of a node in the dependency graph: `(kind, name)`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub kind: ResourceKind,
    pub name: String,
}

impl NodeRef {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Command templates for resources managed by shelling out
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSet {
    pub install: Option<String>,
    pub update: Option<String>,
    pub check: Option<String>,
    pub remove: Option<String>,
}

/// Supported artifact archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveKind {
    TarGz,
    TarXz,
    Zip,
    /// A bare executable, no unpacking
    #[default]
    Raw,
}

/// Download origin for an artifact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub url: String,
    pub checksum: Option<String>,
    pub archive: ArchiveKind,
}

/// A managed toolchain (Go, Node, Rust, ...)
///
/// Runtimes install first and expose an environment (`tool_bin_path`, `env`,
/// `binaries`) that downstream delegated tools build on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Runtime {
    pub name: String,

    /// Resolved version the installer should materialize
    pub version: String,

    pub version_kind: VersionKind,

    /// The version string exactly as the user wrote it (`stable`, `latest`,
    /// `1.26.0`); relevant when `version_kind` is `Alias`
    pub spec_version: String,

    pub kind: InstallKind,

    /// Binaries the runtime provides, in declaration order
    pub binaries: Vec<String>,

    /// Logical install destination for tools delegated to this runtime
    pub tool_bin_path: Option<String>,

    pub env: BTreeMap<String, String>,

    pub commands: Option<CommandSet>,

    /// When true, upgrading this runtime taints every tool installed
    /// through it, forcing their reinstallation
    pub taint_on_upgrade: bool,
}

impl Runtime {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let version = version.into();
        Self {
            name: name.into(),
            spec_version: version.clone(),
            version,
            ..Default::default()
        }
    }

    pub fn with_version_kind(mut self, kind: VersionKind) -> Self {
        self.version_kind = kind;
        self
    }

    pub fn with_spec_version(mut self, spec_version: impl Into<String>) -> Self {
        self.spec_version = spec_version.into();
        self
    }

    pub fn taint_on_upgrade(mut self, taint: bool) -> Self {
        self.taint_on_upgrade = taint;
        self
    }
}

/// An installed artifact
///
/// Exactly one install pattern applies: delegated to a runtime
/// (`runtime_ref`), routed through an installer (`installer_ref`), or
/// self-described (`source` download or a full `commands` set).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub version: String,
    pub version_kind: VersionKind,
    pub spec_version: String,

    /// Runtime whose package manager installs this tool
    pub runtime_ref: Option<String>,

    /// Installer describing how this tool is installed
    pub installer_ref: Option<String>,

    /// Repository the installer consumes for this tool (e.g. a chart repo)
    pub repository_ref: Option<String>,

    /// Package identifier handed to a delegated installer
    pub package: Option<String>,

    /// Download origin when the tool is fetched directly
    pub source: Option<SourceSpec>,

    /// Full command set when the tool manages itself
    pub commands: Option<CommandSet>,
}

impl Tool {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let version = version.into();
        Self {
            name: name.into(),
            spec_version: version.clone(),
            version,
            ..Default::default()
        }
    }

    pub fn with_version_kind(mut self, kind: VersionKind) -> Self {
        self.version_kind = kind;
        self
    }

    pub fn with_spec_version(mut self, spec_version: impl Into<String>) -> Self {
        self.spec_version = spec_version.into();
        self
    }

    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime_ref = Some(runtime.into());
        self
    }

    pub fn with_installer(mut self, installer: impl Into<String>) -> Self {
        self.installer_ref = Some(installer.into());
        self
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository_ref = Some(repository.into());
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn with_source(mut self, source: SourceSpec) -> Self {
        self.source = Some(source);
        self
    }
}

/// A policy record describing how tools that reference it are installed
///
/// Installers carry no recorded state and are never reconciled into
/// actions; they only configure the executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Installer {
    pub name: String,
    pub kind: InstallKind,

    /// Tool that implements this installer (delegation: `pnpm` must exist
    /// before `pnpm add` can run)
    pub tool_ref: Option<String>,

    pub commands: Option<CommandSet>,
}

impl Installer {
    pub fn new(name: impl Into<String>, kind: InstallKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Default::default()
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool_ref = Some(tool.into());
        self
    }
}

/// Where an installer repository is fetched from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositorySource {
    pub kind: String,
    pub url: String,
    pub commands: Option<CommandSet>,
}

/// A repository registration consumed by an installer (e.g. a chart repo)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallerRepository {
    pub name: String,
    pub installer_ref: String,
    pub source: RepositorySource,
}

impl InstallerRepository {
    pub fn new(name: impl Into<String>, installer_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            installer_ref: installer_ref.into(),
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.source.url = url.into();
        self
    }
}

/// One member of a tool set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSetItem {
    pub name: String,
    pub version: String,
    /// Disabled items are skipped at expansion
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ToolSetItem {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Sugar: a group of tools sharing one installer
///
/// Expands to plain [`Tool`]s before resolution. An expanded name that
/// collides with any other tool is a hard error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSet {
    pub name: String,
    pub installer_ref: String,
    pub items: Vec<ToolSetItem>,
}

impl ToolSet {
    pub fn new(name: impl Into<String>, installer_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            installer_ref: installer_ref.into(),
            items: Vec::new(),
        }
    }

    pub fn with_item(mut self, item: ToolSetItem) -> Self {
        self.items.push(item);
        self
    }
}

/// Tagged union over every resource kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Resource {
    Runtime(Runtime),
    Tool(Tool),
    Installer(Installer),
    InstallerRepository(InstallerRepository),
    ToolSet(ToolSet),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Runtime(_) => ResourceKind::Runtime,
            Resource::Tool(_) => ResourceKind::Tool,
            Resource::Installer(_) => ResourceKind::Installer,
            Resource::InstallerRepository(_) => ResourceKind::InstallerRepository,
            Resource::ToolSet(_) => ResourceKind::ToolSet,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Resource::Runtime(r) => &r.name,
            Resource::Tool(t) => &t.name,
            Resource::Installer(i) => &i.name,
            Resource::InstallerRepository(p) => &p.name,
            Resource::ToolSet(s) => &s.name,
        }
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.kind(), self.name())
    }
}
