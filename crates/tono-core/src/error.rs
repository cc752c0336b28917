//! Error taxonomy for the reconciler
//!
//! Per-resource failures (`InstallFailed`, `RemovalFailed`) accumulate and
//! never abort a layer; the rest are fatal where they occur. `Aggregate`
//! carries an apply's collected failures in execution order.

use crate::resource::{NodeRef, ResourceKind};

/// Result type for reconciler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type shared by every tono crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The dependency graph contains a cycle
    #[error("circular dependency detected: {}", format_nodes(nodes))]
    CircularDependency { nodes: Vec<NodeRef> },

    /// Another process holds the state lock
    #[error("state is locked by another process")]
    LockHeld,

    /// The state store failed to load or save
    #[error("state store: {message}")]
    StateIo { message: String },

    /// One resource failed to install; the layer keeps draining
    #[error("failed to install {kind} \"{name}\": {source}")]
    InstallFailed {
        kind: ResourceKind,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// One resource failed to remove; same treatment as a failed install
    #[error("failed to remove {kind} \"{name}\": {source}")]
    RemovalFailed {
        kind: ResourceKind,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// A runtime cannot be removed while a desired tool still delegates
    /// to it
    #[error("cannot remove runtime \"{runtime}\": tool \"{tool}\" depends on runtime \"{runtime}\"")]
    DependencyRemaining { runtime: String, tool: String },

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Tool set expansion produced a name that collides with another
    /// resource
    #[error("name conflict: \"{name}\" is declared more than once")]
    NameConflict { name: String },

    /// Collected failures of one apply, in execution order
    #[error("{}", format_aggregate(.0))]
    Aggregate(Vec<Error>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Fold accumulated failures into a single error
    ///
    /// Returns `None` when nothing failed and the lone error itself when
    /// only one did.
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => Some(errors.remove(0)),
            _ => Some(Error::Aggregate(errors)),
        }
    }

    pub fn state_io(message: impl Into<String>) -> Error {
        Error::StateIo {
            message: message.into(),
        }
    }
}

fn format_nodes(nodes: &[NodeRef]) -> String {
    nodes
        .iter()
        .map(NodeRef::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_aggregate(errors: &[Error]) -> String {
    errors
        .iter()
        .map(Error::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_remaining_message() {
        let err = Error::DependencyRemaining {
            runtime: "go".to_string(),
            tool: "gopls".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "cannot remove runtime \"go\": tool \"gopls\" depends on runtime \"go\""
        );
    }

    #[test]
    fn test_circular_dependency_names_nodes() {
        let err = Error::CircularDependency {
            nodes: vec![
                NodeRef::new(ResourceKind::Installer, "helm"),
                NodeRef::new(ResourceKind::Tool, "helm"),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("circular dependency"));
        assert!(message.contains("installer/helm"));
        assert!(message.contains("tool/helm"));
    }

    #[test]
    fn test_aggregate_folding() {
        assert!(Error::aggregate(vec![]).is_none());

        let single = Error::aggregate(vec![Error::Cancelled]).unwrap();
        assert!(matches!(single, Error::Cancelled));

        let both = Error::aggregate(vec![
            Error::InstallFailed {
                kind: ResourceKind::Tool,
                name: "b".to_string(),
                source: anyhow::anyhow!("exploded"),
            },
            Error::Cancelled,
        ])
        .unwrap();
        let message = both.to_string();
        assert!(message.contains("failed to install tool \"b\": exploded"));
        assert!(message.contains("operation cancelled"));
        assert!(message.find("\"b\"").unwrap() < message.find("cancelled").unwrap());
    }
}
