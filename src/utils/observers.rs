// src/utils/observers.rs
//! Ordered, panic-isolated observer fan-out
//!
//! Emission is serialized through one re-entrant dispatch lock: each event
//! reaches every observer (in registration order) before the next event is
//! emitted, and an observer may emit further events from inside its callback
//! without deadlocking.
//!
//! A panicking observer is logged and stays registered; delivery continues
//! with the next observer.

use parking_lot::{ReentrantMutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

pub struct ObserverSet<O: ?Sized> {
    /// Observers in registration order
    observers: RwLock<Vec<Arc<O>>>,

    /// Serializes emission
    dispatch: ReentrantMutex<()>,

    /// Name used in log lines
    label: &'static str,
}

impl<O: ?Sized> ObserverSet<O> {
    pub fn new(label: &'static str) -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            dispatch: ReentrantMutex::new(()),
            label,
        }
    }

    pub fn add(&self, observer: Arc<O>) {
        self.observers.write().push(observer);
    }

    /// Remove by pointer identity; returns whether it was registered
    pub fn remove(&self, observer: &Arc<O>) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Deliver one event to every observer currently registered
    pub fn emit(&self, mut deliver: impl FnMut(&O)) {
        let _dispatch = self.dispatch.lock();

        // Snapshot so observers can (un)register from inside a callback
        let snapshot: Vec<Arc<O>> = self.observers.read().clone();

        for observer in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| deliver(&observer)));
            if outcome.is_err() {
                error!("{} observer panicked; continuing delivery", self.label);
            }
        }
    }
}
