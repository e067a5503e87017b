//! Accumulates failures so the terminal one can report its history.

use crate::error::Suppressed;

/// Ordered record of failures seen during one operation.
#[derive(Debug, Clone)]
pub struct ExceptionCollector<E> {
    errors: Vec<E>,
}

impl<E> ExceptionCollector<E> {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// A collector that already remembers `previous`.
    pub fn seeded(previous: Option<E>) -> Self {
        Self {
            errors: previous.into_iter().collect(),
        }
    }

    pub fn collect(&mut self, error: E) {
        self.errors.push(error);
    }

    pub fn last(&self) -> Option<&E> {
        self.errors.last()
    }

    pub fn all(&self) -> &[E] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }
}

impl<E: Clone> ExceptionCollector<E> {
    /// Record `error` and return it with everything collected before it.
    pub fn collect_get(&mut self, error: E) -> Suppressed<E> {
        let suppressed = self.errors.clone();
        self.errors.push(error.clone());
        Suppressed::new(error, suppressed)
    }

    /// The most recent failure, with the rest as suppressed.
    pub fn throw_last(&self) -> Option<Suppressed<E>> {
        let (last, earlier) = self.errors.split_last()?;
        Some(Suppressed::new(last.clone(), earlier.to_vec()))
    }
}

impl<E> Default for ExceptionCollector<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_get_keeps_history() {
        let mut collector = ExceptionCollector::seeded(Some("first"));
        collector.collect("second");

        let thrown = collector.collect_get("third");
        assert_eq!(*thrown.error(), "third");
        assert_eq!(thrown.suppressed(), &["first", "second"]);
        assert_eq!(collector.len(), 3);
    }

    #[test]
    fn throw_last_on_empty_is_none() {
        let collector: ExceptionCollector<&str> = ExceptionCollector::new();
        assert!(collector.throw_last().is_none());
    }

    #[test]
    fn throw_last_splits_history() {
        let mut collector = ExceptionCollector::new();
        collector.collect(1);
        collector.collect(2);
        let thrown = collector.throw_last().unwrap();
        assert_eq!(*thrown.error(), 2);
        assert_eq!(thrown.suppressed(), &[1]);
    }
}
