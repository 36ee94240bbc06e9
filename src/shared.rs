//! Process-wide serialization for front ends that run operations concurrently.
//!
//! The CLI runs one operation per process. A web front end may receive many
//! requests at once; routing them through [`SharedManager`] ensures that at
//! most one mutating operation runs at a time in this process, so the pointer
//! and the active config never disagree because two switches interleaved.
//! Coordination across processes is not attempted.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::Result;
use crate::manager::ProfileManager;
use crate::paths::Paths;

#[derive(Debug, Clone)]
pub struct SharedManager {
    inner: Arc<Mutex<ProfileManager>>,
}

impl SharedManager {
    pub fn new(manager: ProfileManager) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manager)),
        }
    }

    pub fn open(paths: &Paths) -> Result<Self> {
        Ok(Self::new(ProfileManager::open(paths)?))
    }

    /// Run `f` with exclusive access to the manager
    pub fn with<T>(&self, f: impl FnOnce(&ProfileManager) -> T) -> T {
        let guard = self.inner.lock();
        f(&guard)
    }
}
