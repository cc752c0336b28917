//! State persistence contract
//!
//! The engine holds the lock for the duration of an apply or plan and
//! treats the store as opaque; the on-disk format and its locking
//! primitive live outside the core.

use crate::error::{Error, Result};
use crate::state::UserState;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Persistent store for [`UserState`]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Acquire the exclusive lock; a second concurrent holder fails with
    /// [`Error::LockHeld`]
    async fn lock(&self) -> Result<()>;

    async fn unlock(&self) -> Result<()>;

    async fn load(&self) -> Result<UserState>;

    async fn save(&self, state: &UserState) -> Result<()>;
}

/// In-process store for embedders that do not persist, and for tests
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<UserState>,
    locked: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: UserState) -> Self {
        Self {
            state: Mutex::new(state),
            locked: AtomicBool::new(false),
        }
    }

    /// Current contents, regardless of the lock
    pub fn snapshot(&self) -> UserState {
        self.state.lock().expect("state mutex poisoned").clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn lock(&self) -> Result<()> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::LockHeld);
        }
        Ok(())
    }

    async fn unlock(&self) -> Result<()> {
        self.locked.store(false, Ordering::Release);
        Ok(())
    }

    async fn load(&self) -> Result<UserState> {
        Ok(self.snapshot())
    }

    async fn save(&self, state: &UserState) -> Result<()> {
        *self.state.lock().expect("state mutex poisoned") = state.clone();
        Ok(())
    }
}
