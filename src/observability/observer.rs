//! State transition hooks.

use std::sync::Arc;

use crate::error::Error;
use crate::handler::StateKind;

/// Notified of handler state changes.
///
/// `state_changed` is called while the transition lock is held and must not
/// block or call back into the handler.
pub trait StateObserver: Send + Sync {
    fn state_changed(&self, _previous: StateKind, _new: StateKind) {}

    fn before_state_resume(&self, _state: StateKind) {}

    fn after_state_resume(&self, _state: StateKind, _result: &Result<(), Error>) {}
}

/// Logs every transition.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl StateObserver for LoggingObserver {
    fn state_changed(&self, previous: StateKind, new: StateKind) {
        tracing::info!(from = %previous, to = %new, "Network handler state changed");
    }

    fn before_state_resume(&self, state: StateKind) {
        tracing::trace!(state = %state, "Resuming connection");
    }

    fn after_state_resume(&self, state: StateKind, result: &Result<(), Error>) {
        match result {
            Ok(()) => tracing::debug!(state = %state, "Connection resumed"),
            Err(e) => tracing::debug!(state = %state, error = %e, "Resume failed"),
        }
    }
}

/// Fans each notification out to several observers in order.
#[derive(Default, Clone)]
pub struct ObserverChain {
    observers: Vec<Arc<dyn StateObserver>>,
}

impl ObserverChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn StateObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl StateObserver for ObserverChain {
    fn state_changed(&self, previous: StateKind, new: StateKind) {
        for observer in &self.observers {
            observer.state_changed(previous, new);
        }
    }

    fn before_state_resume(&self, state: StateKind) {
        for observer in &self.observers {
            observer.before_state_resume(state);
        }
    }

    fn after_state_resume(&self, state: StateKind, result: &Result<(), Error>) {
        for observer in &self.observers {
            observer.after_state_resume(state, result);
        }
    }
}
