//! Shared retry budget.
//!
//! # Responsibilities
//! - Bound the number of extra attempts (savepoint jumps, fallback phases,
//!   handler replacements) across one connect cycle
//! - Be cheap to clone and safe to consume from concurrent tasks

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A cloneable handle onto one pool of retry attempts.
///
/// Clones share the same counter.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    inner: Arc<BudgetInner>,
}

#[derive(Debug)]
struct BudgetInner {
    max: u32,
    used: AtomicU32,
}

impl RetryBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                max: max_attempts,
                used: AtomicU32::new(0),
            }),
        }
    }

    /// A budget that is never exhausted.
    pub fn unlimited() -> Self {
        Self::new(u32::MAX)
    }

    /// Consume one attempt. Returns `false` once the budget is spent.
    pub fn try_acquire(&self) -> bool {
        self.inner
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.inner.max).then_some(used + 1)
            })
            .is_ok()
    }

    pub fn max(&self) -> u32 {
        self.inner.max
    }

    pub fn used(&self) -> u32 {
        self.inner.used.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> u32 {
        self.inner.max.saturating_sub(self.used())
    }

    /// Give back every consumed attempt.
    pub fn reset(&self) {
        self.inner.used.store(0, Ordering::Release);
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(crate::config::RetryConfig::default().max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_exhausted_after_max_attempts() {
        let budget = RetryBudget::new(2);
        assert!(budget.try_acquire());
        assert!(budget.try_acquire());
        assert!(!budget.try_acquire());
        assert_eq!(budget.used(), 2);
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn clones_share_the_counter() {
        let budget = RetryBudget::new(1);
        let other = budget.clone();
        assert!(other.try_acquire());
        assert!(!budget.try_acquire());

        budget.reset();
        assert!(other.try_acquire());
    }

    #[test]
    fn zero_budget_refuses_everything() {
        let budget = RetryBudget::new(0);
        assert!(!budget.try_acquire());
    }
}
