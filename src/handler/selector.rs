//! Outer reconnect loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::Error;
use crate::handler::context::HandlerContext;
use crate::handler::network::NetworkHandler;
use crate::observability::metrics;
use crate::pipeline::ExceptionCollector;
use crate::resilience::{Backoff, RetryBudget};

/// Keeps a usable [`NetworkHandler`] around.
///
/// A `Closed` handler is replaced by a fresh one built from the same
/// context. Recoverable failures are retried with exponential backoff while
/// the shared [`RetryBudget`] lasts.
pub struct HandlerSelector {
    context: HandlerContext,
    backoff: Backoff,
    current: Mutex<Option<NetworkHandler>>,
    history: Mutex<Vec<Error>>,
    closed: AtomicBool,
}

impl HandlerSelector {
    pub fn new(context: HandlerContext, backoff: Backoff) -> Self {
        Self {
            context,
            backoff,
            current: Mutex::new(None),
            history: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn budget(&self) -> &RetryBudget {
        &self.context.budget
    }

    /// The handler most recently handed out, if any.
    pub fn current(&self) -> Option<NetworkHandler> {
        self.lock().clone()
    }

    /// Failures recorded by the last [`resume`](Self::resume), oldest first,
    /// whether or not it eventually succeeded.
    pub fn last_failures(&self) -> Vec<Error> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Return a handler in `Ok`, reconnecting as needed.
    ///
    /// The error carries every failed attempt as suppressed.
    pub async fn resume(&self) -> Result<NetworkHandler, Error> {
        let mut failures = ExceptionCollector::new();
        let result = self.reconnect(&mut failures).await;
        *self.history.lock().unwrap_or_else(PoisonError::into_inner) = failures.all().to_vec();
        result
    }

    async fn reconnect(&self, failures: &mut ExceptionCollector<Error>) -> Result<NetworkHandler, Error> {
        let mut attempt = 1;

        loop {
            let handler = self.select()?;
            let error = match handler.resume_connection().await {
                Ok(()) => return Ok(handler),
                Err(error) => error,
            };

            if !error.is_recoverable() || self.closed.load(Ordering::Acquire) {
                return Err(Error::from_collected(failures.collect_get(error)));
            }
            if !self.context.budget.try_acquire() {
                tracing::warn!(error = %error, max = self.context.budget.max(), "Retry budget exhausted");
                failures.collect(error);
                let exhausted = Error::RetryBudgetExhausted(self.context.budget.max());
                return Err(Error::from_collected(failures.collect_get(exhausted)));
            }

            let delay = self.backoff.delay(attempt);
            attempt += 1;
            metrics::record_reconnect_attempt();
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Reconnecting"
            );
            failures.collect(error);
            tokio::time::sleep(delay).await;
        }
    }

    /// Close the current handler and stop handing out new ones.
    pub fn close(&self, cause: Option<Error>) -> Option<Error> {
        self.closed.store(true, Ordering::Release);
        match self.lock().as_ref() {
            Some(handler) => handler.close(cause),
            None => cause,
        }
    }

    fn select(&self) -> Result<NetworkHandler, Error> {
        let mut current = self.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(match current.as_ref() {
                Some(handler) => Error::Closed(handler.last_failure().map(Box::new)),
                None => Error::Closed(None),
            });
        }
        match current.as_ref() {
            Some(handler) if !handler.is_closed() => Ok(handler.clone()),
            _ => {
                let handler = NetworkHandler::new(self.context.clone());
                tracing::debug!("Created network handler");
                *current = Some(handler.clone());
                Ok(handler)
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<NetworkHandler>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for HandlerSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSelector")
            .field("current", &self.current().map(|h| h.state()))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
