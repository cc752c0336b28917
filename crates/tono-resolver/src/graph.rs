//! Dependency graph construction and layering

use std::collections::{BTreeMap, BTreeSet};
use tono_core::{Error, NodeRef, Resource, ResourceKind, Result};

/// A node in the dependency graph
///
/// Phantom nodes (no resource) stand in for references to names outside
/// the resource list; they keep their topological place but are skipped at
/// execution.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub node: NodeRef,
    pub resource: Option<Resource>,
}

impl GraphNode {
    pub fn is_phantom(&self) -> bool {
        self.resource.is_none()
    }
}

/// A set of nodes whose dependencies all live in earlier layers
#[derive(Debug, Clone, Default)]
pub struct Layer {
    pub nodes: Vec<GraphNode>,
}

/// Dependency graph over heterogeneous resources
///
/// Edges point from a node to the nodes it depends on.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<NodeRef, GraphNode>,
    edges: BTreeMap<NodeRef, BTreeSet<NodeRef>>,
    dependents: BTreeMap<NodeRef, BTreeSet<NodeRef>>,
}

impl DependencyGraph {
    /// Build the graph from an already-expanded resource list
    ///
    /// Tool sets must be expanded first; a duplicate `(kind, name)` is a
    /// [`Error::NameConflict`].
    pub fn build(resources: &[Resource]) -> Result<Self> {
        let mut graph = Self::default();

        for resource in resources {
            if resource.kind() == ResourceKind::ToolSet {
                continue;
            }
            let node = resource.node_ref();
            let declared = GraphNode {
                node: node.clone(),
                resource: Some(resource.clone()),
            };
            if graph.nodes.insert(node.clone(), declared).is_some() {
                return Err(Error::NameConflict { name: node.name });
            }
        }

        for resource in resources {
            let from = resource.node_ref();
            match resource {
                Resource::Tool(tool) => {
                    if let Some(runtime) = &tool.runtime_ref {
                        graph.add_edge(&from, NodeRef::new(ResourceKind::Runtime, runtime));
                    }
                    if let Some(installer) = &tool.installer_ref {
                        graph.add_edge(&from, NodeRef::new(ResourceKind::Installer, installer));
                    }
                    if let Some(repository) = &tool.repository_ref {
                        graph.add_edge(
                            &from,
                            NodeRef::new(ResourceKind::InstallerRepository, repository),
                        );
                    }
                }
                Resource::Installer(installer) => {
                    if let Some(tool) = &installer.tool_ref {
                        graph.add_edge(&from, NodeRef::new(ResourceKind::Tool, tool));
                    }
                }
                Resource::InstallerRepository(repository) => {
                    graph.add_edge(
                        &from,
                        NodeRef::new(ResourceKind::Installer, &repository.installer_ref),
                    );
                }
                Resource::Runtime(_) | Resource::ToolSet(_) => {}
            }
        }

        Ok(graph)
    }

    fn add_edge(&mut self, from: &NodeRef, to: NodeRef) {
        self.nodes.entry(to.clone()).or_insert_with(|| GraphNode {
            node: to.clone(),
            resource: None,
        });
        self.edges
            .entry(from.clone())
            .or_default()
            .insert(to.clone());
        self.dependents.entry(to).or_default().insert(from.clone());
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, node: &NodeRef) -> Vec<NodeRef> {
        self.edges
            .get(node)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Nodes that directly depend on a node
    pub fn dependents(&self, node: &NodeRef) -> Vec<NodeRef> {
        self.dependents
            .get(node)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Produce execution layers via a Kahn scan
    ///
    /// Within a layer, runtimes order before installers, installers before
    /// repositories, repositories before tools; remaining ties break by
    /// name. A non-empty remainder means a cycle and fails with
    /// [`Error::CircularDependency`] naming the stuck nodes.
    pub fn resolve(&self) -> Result<Vec<Layer>> {
        let mut placed: BTreeSet<NodeRef> = BTreeSet::new();
        let mut layers = Vec::new();

        while placed.len() < self.nodes.len() {
            let mut ready: Vec<&GraphNode> = self
                .nodes
                .values()
                .filter(|candidate| !placed.contains(&candidate.node))
                .filter(|candidate| {
                    self.edges
                        .get(&candidate.node)
                        .is_none_or(|deps| deps.iter().all(|dep| placed.contains(dep)))
                })
                .collect();

            if ready.is_empty() {
                let nodes: Vec<NodeRef> = self
                    .nodes
                    .keys()
                    .filter(|node| !placed.contains(node))
                    .cloned()
                    .collect();
                return Err(Error::CircularDependency { nodes });
            }

            ready.sort_by(|a, b| {
                kind_rank(a.node.kind)
                    .cmp(&kind_rank(b.node.kind))
                    .then_with(|| a.node.name.cmp(&b.node.name))
            });

            for node in &ready {
                placed.insert(node.node.clone());
            }
            layers.push(Layer {
                nodes: ready.into_iter().cloned().collect(),
            });
        }

        Ok(layers)
    }
}

fn kind_rank(kind: ResourceKind) -> u8 {
    match kind {
        ResourceKind::Runtime => 0,
        ResourceKind::Installer => 1,
        ResourceKind::InstallerRepository => 2,
        ResourceKind::Tool => 3,
        ResourceKind::ToolSet => 4,
    }
}
