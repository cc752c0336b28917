//! # tono-resolver
//!
//! Turns a flat resource list into ordered execution layers.
//!
//! Dependencies are derived from resource fields, never declared: a tool
//! depends on its runtime, installer, and repository; a delegation
//! installer depends on the tool that implements it; a repository depends
//! on its installer. References to names outside the list become phantom
//! nodes that hold their topological place but perform no work.
//!
//! The resolver is pure: no I/O, no async, no installer knowledge.

pub mod expand;
pub mod graph;

pub use expand::expand_tool_sets;
pub use graph::{DependencyGraph, GraphNode, Layer};

pub use tono_core::{Error, Result};
