//! Action execution
//!
//! One executor instance is shared by every worker of an apply. It routes
//! an action to the matching installer, folds the result into the shared
//! state map, and persists the map after every action so partial progress
//! is never lost. The map and the store write share one mutex; the mutex is
//! never held across an installer call.

use crate::scheduler::WorkItem;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tono_core::{
    Action, Error, Event, EventSink, InstallerRepositoryState, RepositoryInstaller, Resource,
    ResourceKind, Result, RuntimeInstaller, RuntimeState, StateStore, ToolInstaller, ToolState,
    UserState,
};
use tracing::{debug, warn};

pub(crate) struct Executor {
    pub tools: Arc<dyn ToolInstaller>,
    pub runtimes: Arc<dyn RuntimeInstaller>,
    pub repositories: Arc<dyn RepositoryInstaller>,
    pub store: Arc<dyn StateStore>,
    pub state: Arc<Mutex<UserState>>,
    pub events: EventSink,
}

/// State-map mutation produced by a successful installer call
enum StateUpdate {
    Runtime(String, RuntimeState),
    Tool(String, ToolState),
    Repository(String, InstallerRepositoryState),
    RemoveRuntime(String),
    RemoveTool(String),
    RemoveRepository(String),
}

impl Executor {
    /// Apply one planned action end to end
    pub async fn run(&self, token: &CancellationToken, item: &WorkItem) -> Result<()> {
        debug!(
            node = %item.node,
            action = %item.action,
            method = %item.method,
            "executing"
        );
        self.events.emit(Event::Start {
            kind: item.node.kind,
            name: item.node.name.clone(),
            version: item.version.clone(),
            method: item.method.clone(),
            action: item.action,
        });

        let dispatched = self.dispatch(token, item).await;

        // Persist after every action, failed ones included, under the same
        // lock that guards the map.
        let (install_path, saved) = {
            let mut state = self.state.lock().await;
            let install_path = match &dispatched {
                Ok(update) => apply_update(&mut state, update),
                Err(_) => None,
            };
            (install_path, self.store.save(&state).await)
        };

        match dispatched {
            Ok(_) => {
                self.events.emit(Event::Complete {
                    kind: item.node.kind,
                    name: item.node.name.clone(),
                    action: item.action,
                    install_path,
                });
                saved.map_err(|err| {
                    warn!(node = %item.node, error = %err, "state save failed after action");
                    err
                })
            }
            Err(err) => {
                self.events.emit(Event::Failed {
                    kind: item.node.kind,
                    name: item.node.name.clone(),
                    error: err.to_string(),
                });
                if let Err(save_err) = saved {
                    warn!(node = %item.node, error = %save_err, "state save failed after action");
                }
                Err(wrap_failure(item, err))
            }
        }
    }

    async fn dispatch(&self, token: &CancellationToken, item: &WorkItem) -> Result<StateUpdate> {
        let name = item.node.name.as_str();
        if item.action.installs() {
            match item.resource.as_ref() {
                Some(Resource::Runtime(runtime)) => {
                    let mut new_state =
                        self.runtimes.install(token.clone(), runtime, name).await?;
                    // Taints are ephemeral; a successful install always
                    // starts clean.
                    new_state.taint.clear();
                    Ok(StateUpdate::Runtime(name.to_string(), new_state))
                }
                Some(Resource::Tool(tool)) => {
                    let mut new_state = self.tools.install(token.clone(), tool, name).await?;
                    new_state.taint.clear();
                    Ok(StateUpdate::Tool(name.to_string(), new_state))
                }
                Some(Resource::InstallerRepository(repository)) => {
                    let mut new_state = self
                        .repositories
                        .install(token.clone(), repository, name)
                        .await?;
                    new_state.taint.clear();
                    Ok(StateUpdate::Repository(name.to_string(), new_state))
                }
                _ => Err(Error::Other(anyhow::anyhow!(
                    "{} is not an installable resource",
                    item.node
                ))),
            }
        } else {
            match item.node.kind {
                ResourceKind::Runtime => {
                    let recorded = self.state.lock().await.runtimes.get(name).cloned();
                    if let Some(recorded) = recorded {
                        self.runtimes.remove(token.clone(), &recorded, name).await?;
                    }
                    Ok(StateUpdate::RemoveRuntime(name.to_string()))
                }
                ResourceKind::Tool => {
                    let recorded = self.state.lock().await.tools.get(name).cloned();
                    if let Some(recorded) = recorded {
                        self.tools.remove(token.clone(), &recorded, name).await?;
                    }
                    Ok(StateUpdate::RemoveTool(name.to_string()))
                }
                ResourceKind::InstallerRepository => {
                    let recorded = self.state.lock().await.repositories.get(name).cloned();
                    if let Some(recorded) = recorded {
                        self.repositories
                            .remove(token.clone(), &recorded, name)
                            .await?;
                    }
                    Ok(StateUpdate::RemoveRepository(name.to_string()))
                }
                kind => Err(Error::Other(anyhow::anyhow!(
                    "{kind} \"{name}\" cannot be removed"
                ))),
            }
        }
    }
}

fn apply_update(state: &mut UserState, update: &StateUpdate) -> Option<String> {
    match update {
        StateUpdate::Runtime(name, new_state) => {
            let path = new_state.install_path.clone();
            state.runtimes.insert(name.clone(), new_state.clone());
            Some(path)
        }
        StateUpdate::Tool(name, new_state) => {
            let path = new_state.install_path.clone();
            state.tools.insert(name.clone(), new_state.clone());
            Some(path)
        }
        StateUpdate::Repository(name, new_state) => {
            state.repositories.insert(name.clone(), new_state.clone());
            None
        }
        StateUpdate::RemoveRuntime(name) => {
            state.runtimes.remove(name);
            None
        }
        StateUpdate::RemoveTool(name) => {
            state.tools.remove(name);
            None
        }
        StateUpdate::RemoveRepository(name) => {
            state.repositories.remove(name);
            None
        }
    }
}

fn wrap_failure(item: &WorkItem, err: Error) -> Error {
    let cause = anyhow::Error::new(err);
    match item.action {
        Action::Remove => Error::RemovalFailed {
            kind: item.node.kind,
            name: item.node.name.clone(),
            source: cause,
        },
        _ => Error::InstallFailed {
            kind: item.node.kind,
            name: item.node.name.clone(),
            source: cause,
        },
    }
}
