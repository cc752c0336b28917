//! # tono-engine
//!
//! The reconciliation engine. An [`Engine`] takes a desired resource set
//! and the last-known installed state and converges the machine: it
//! installs what is missing, upgrades what drifted, reinstalls what a
//! runtime upgrade tainted, and removes what was deleted.
//!
//! An apply runs three phases:
//!
//! 1. **DAG** — resources execute layer by layer in dependency order,
//!    bounded-parallel, with delegated installs serialized per runtime or
//!    installer.
//! 2. **Taint** — tools depending on a just-upgraded runtime (with
//!    `taint_on_upgrade`) are reinstalled.
//! 3. **Remove** — state entries absent from the desired set are removed,
//!    tools before their runtimes.
//!
//! Failures accumulate instead of aborting: a failed node never stops
//! independent work in its layer, and the aggregated error is returned
//! after all phases have run.

mod config;
mod engine;
mod executor;
mod reconcile;
mod scheduler;
mod taint;

pub use config::{DEFAULT_PARALLELISM, MAX_PARALLELISM, UpdateConfig};
pub use engine::{Engine, Plan, ResolverConfigurer};
pub use reconcile::{reconcile_repository, reconcile_runtime, reconcile_tool};

pub use tono_core::{Error, Result};
