//! Settle-once handles that many callers can await
//!
//! A [`Deferred`] is resolved or rejected at most once; every clone observes
//! the same outcome. Owners re-arm by replacing their handle with a fresh
//! instance, which starts a new epoch for callers that arrive afterwards.

use std::sync::Arc;
use tokio::sync::watch;

use crate::errors::{ControllerError, Result};

type Slot<T> = Option<Result<T>>;

pub struct Deferred<T> {
    slot: Arc<watch::Sender<Slot<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T: Clone> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Deferred<T> {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Fulfil the handle. Returns `false` if it was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Fail the handle. Returns `false` if it was already settled.
    pub fn reject(&self, err: ControllerError) -> bool {
        self.settle(Err(err))
    }

    fn settle(&self, outcome: Result<T>) -> bool {
        self.slot.send_if_modified(move |slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    pub fn is_settled(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Current outcome without waiting
    pub fn peek(&self) -> Option<Result<T>> {
        self.slot.borrow().clone()
    }

    /// Wait until the handle settles. Returns immediately once it has.
    pub async fn wait(&self) -> Result<T> {
        let mut rx = self.slot.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(ControllerError::Stopped {
            what: "deferred value",
        }))
    }

    /// True when both handles belong to the same epoch
    pub fn same_epoch(&self, other: &Deferred<T>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}
