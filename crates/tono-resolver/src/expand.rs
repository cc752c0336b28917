//! Tool set expansion
//!
//! Tool sets are sugar: each enabled item becomes a plain tool under the
//! set's installer. Expansion runs before graph construction so the
//! resolver and the reconcilers only ever see concrete resources.

use std::collections::BTreeSet;
use tono_core::{Error, Resource, Result, Tool, VersionKind};

/// Expand every tool set in place, preserving list order
///
/// An expanded name that collides with any other tool (declared or
/// expanded) aborts with [`Error::NameConflict`]. Disabled items are
/// dropped.
pub fn expand_tool_sets(resources: Vec<Resource>) -> Result<Vec<Resource>> {
    let mut tool_names: BTreeSet<String> = resources
        .iter()
        .filter_map(|resource| match resource {
            Resource::Tool(tool) => Some(tool.name.clone()),
            _ => None,
        })
        .collect();

    let mut expanded = Vec::with_capacity(resources.len());
    for resource in resources {
        let set = match resource {
            Resource::ToolSet(set) => set,
            other => {
                expanded.push(other);
                continue;
            }
        };

        for item in &set.items {
            if !item.enabled {
                continue;
            }
            if !tool_names.insert(item.name.clone()) {
                return Err(Error::NameConflict {
                    name: item.name.clone(),
                });
            }
            let mut tool = Tool::new(&item.name, &item.version)
                .with_installer(&set.installer_ref)
                .with_package(&item.name);
            tool.version_kind = classify_version(&item.version);
            expanded.push(Resource::Tool(tool));
        }
    }

    Ok(expanded)
}

// Set items carry only a version string; `latest` is the one channel the
// sugar supports.
fn classify_version(version: &str) -> VersionKind {
    if version == "latest" {
        VersionKind::Latest
    } else {
        VersionKind::Exact
    }
}
