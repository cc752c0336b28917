//! Layered bounded-parallel execution
//!
//! Each layer drains in three waves: runtimes, then installer
//! repositories, then tools. The wave barrier is what makes a runtime's
//! start observably precede any tool start in the same layer. Tools are
//! further partitioned by delegation key; members of one group run
//! strictly sequentially (a shared `go install` or `pnpm add` backend
//! cannot be invoked concurrently), while different groups, free tools,
//! and the other waves all share the global parallelism bound.
//!
//! Failures never stop independent work: a failed node is recorded and the
//! layer keeps draining. Only a delegation group abandons its own
//! remaining members after one of them fails.

use crate::executor::Executor;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tono_core::{Action, Error, NodeRef, Resource, ResourceKind};
use tracing::{debug, warn};

/// One schedulable unit: a node, its decided action, and everything the
/// executor needs to run it
#[derive(Debug, Clone)]
pub(crate) struct WorkItem {
    pub node: NodeRef,
    pub action: Action,
    /// Desired resource; absent for removals, which read recorded state
    pub resource: Option<Resource>,
    pub version: String,
    /// Mechanism label surfaced in start events
    pub method: String,
    /// Delegation key: `runtime:<name>`, `installer:<name>`, or empty for
    /// unconstrained work
    pub group: String,
}

/// Outcome of one layer
#[derive(Debug, Default)]
pub(crate) struct LayerReport {
    /// Failures in layer-node order
    pub errors: Vec<Error>,
    /// Nodes whose action completed, with the action that ran
    pub succeeded: Vec<(NodeRef, Action)>,
}

struct ItemResult {
    index: usize,
    node: NodeRef,
    action: Action,
    error: Option<Error>,
}

/// Drain one layer: runtimes, repositories, then tools
pub(crate) async fn run_layer(
    executor: &Arc<Executor>,
    semaphore: &Arc<Semaphore>,
    token: &CancellationToken,
    items: Vec<WorkItem>,
) -> LayerReport {
    let mut runtimes = Vec::new();
    let mut repositories = Vec::new();
    let mut tools = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        match item.node.kind {
            ResourceKind::Runtime => runtimes.push((index, item)),
            ResourceKind::InstallerRepository => repositories.push((index, item)),
            _ => tools.push((index, item)),
        }
    }

    let mut results = Vec::new();
    results.extend(run_wave(executor, semaphore, token, runtimes).await);
    results.extend(run_wave(executor, semaphore, token, repositories).await);
    results.extend(run_tool_wave(executor, semaphore, token, tools).await);
    results.sort_by_key(|result| result.index);

    let mut report = LayerReport::default();
    for result in results {
        match result.error {
            Some(error) => report.errors.push(error),
            None => report.succeeded.push((result.node, result.action)),
        }
    }
    report
}

async fn run_wave(
    executor: &Arc<Executor>,
    semaphore: &Arc<Semaphore>,
    token: &CancellationToken,
    items: Vec<(usize, WorkItem)>,
) -> Vec<ItemResult> {
    let mut workers: JoinSet<Vec<ItemResult>> = JoinSet::new();
    for (index, item) in items {
        spawn_single(&mut workers, executor, semaphore, token, index, item);
    }
    drain(workers).await
}

async fn run_tool_wave(
    executor: &Arc<Executor>,
    semaphore: &Arc<Semaphore>,
    token: &CancellationToken,
    items: Vec<(usize, WorkItem)>,
) -> Vec<ItemResult> {
    // Partition into delegation groups, keeping first-seen group order and
    // insertion order within each group.
    let mut groups: Vec<(String, Vec<(usize, WorkItem)>)> = Vec::new();
    let mut free = Vec::new();
    for (index, item) in items {
        if item.group.is_empty() {
            free.push((index, item));
            continue;
        }
        match groups.iter_mut().find(|(key, _)| *key == item.group) {
            Some((_, members)) => members.push((index, item)),
            None => groups.push((item.group.clone(), vec![(index, item)])),
        }
    }

    let mut workers: JoinSet<Vec<ItemResult>> = JoinSet::new();
    for (index, item) in free {
        spawn_single(&mut workers, executor, semaphore, token, index, item);
    }
    for (key, members) in groups {
        let executor = executor.clone();
        let semaphore = semaphore.clone();
        let token = token.clone();
        workers.spawn(async move {
            let mut results = Vec::new();
            for (index, item) in members {
                if token.is_cancelled() {
                    break;
                }
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let result = executor.run(&token, &item).await;
                drop(permit);
                let failed = result.is_err();
                results.push(ItemResult {
                    index,
                    node: item.node,
                    action: item.action,
                    error: result.err(),
                });
                if failed {
                    // A broken backend would poison every later member of
                    // this group; skip them and let the layer drain.
                    debug!(group = %key, "delegation group aborted after failure");
                    break;
                }
            }
            results
        });
    }
    drain(workers).await
}

fn spawn_single(
    workers: &mut JoinSet<Vec<ItemResult>>,
    executor: &Arc<Executor>,
    semaphore: &Arc<Semaphore>,
    token: &CancellationToken,
    index: usize,
    item: WorkItem,
) {
    let executor = executor.clone();
    let semaphore = semaphore.clone();
    let token = token.clone();
    workers.spawn(async move {
        if token.is_cancelled() {
            return Vec::new();
        }
        let Ok(_permit) = semaphore.acquire_owned().await else {
            return Vec::new();
        };
        let result = executor.run(&token, &item).await;
        vec![ItemResult {
            index,
            node: item.node,
            action: item.action,
            error: result.err(),
        }]
    });
}

async fn drain(mut workers: JoinSet<Vec<ItemResult>>) -> Vec<ItemResult> {
    let mut results = Vec::new();
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(batch) => results.extend(batch),
            Err(err) => {
                warn!(error = %err, "layer worker aborted");
                results.push(ItemResult {
                    index: usize::MAX,
                    node: NodeRef::new(ResourceKind::Tool, "<worker>"),
                    action: Action::None,
                    error: Some(Error::Other(anyhow::anyhow!(
                        "layer worker aborted: {err}"
                    ))),
                });
            }
        }
    }
    results
}
