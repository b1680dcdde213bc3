//! Exclusive ownership of the node's on-disk database directory
//!
//! Whoever mutates the chain database (the live node, the snapshot installer
//! or a reset) must hold a [`DatabaseLease`]. Leases are handed out one at a
//! time and released on drop.

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseHolder {
    Node,
    Installer,
    Maintenance,
}

impl fmt::Display for DatabaseHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseHolder::Node => write!(f, "node"),
            DatabaseHolder::Installer => write!(f, "snapshot installer"),
            DatabaseHolder::Maintenance => write!(f, "maintenance"),
        }
    }
}

#[derive(Debug, Default)]
pub struct DatabaseOwnership {
    lock: Arc<AsyncMutex<()>>,
    holder: Arc<Mutex<Option<DatabaseHolder>>>,
}

impl DatabaseOwnership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the database is free, then take it for `holder`
    pub async fn acquire(&self, holder: DatabaseHolder) -> DatabaseLease {
        if let Some(current) = self.holder() {
            debug!("Database held by {}, {} is waiting", current, holder);
        }
        let guard = self.lock.clone().lock_owned().await;
        self.set_holder(Some(holder));
        debug!("Database acquired by {}", holder);
        DatabaseLease {
            _guard: guard,
            holder,
            slot: self.holder.clone(),
        }
    }

    /// Take the database only if nobody holds it
    pub fn try_acquire(&self, holder: DatabaseHolder) -> Option<DatabaseLease> {
        let guard = self.lock.clone().try_lock_owned().ok()?;
        self.set_holder(Some(holder));
        Some(DatabaseLease {
            _guard: guard,
            holder,
            slot: self.holder.clone(),
        })
    }

    pub fn holder(&self) -> Option<DatabaseHolder> {
        *self.holder.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_holder(&self, holder: Option<DatabaseHolder>) {
        *self.holder.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = holder;
    }
}

#[derive(Debug)]
pub struct DatabaseLease {
    _guard: OwnedMutexGuard<()>,
    holder: DatabaseHolder,
    slot: Arc<Mutex<Option<DatabaseHolder>>>,
}

impl DatabaseLease {
    pub fn holder(&self) -> DatabaseHolder {
        self.holder
    }
}

impl Drop for DatabaseLease {
    fn drop(&mut self) {
        // Cleared before the guard field drops, so the next holder overwrites it.
        *self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        debug!("Database released by {}", self.holder);
    }
}
