//! Per-execution state handed to every phase.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use tracing::Span;

use crate::error::PipelineError;
use crate::pipeline::collector::ExceptionCollector;
use crate::resilience::RetryBudget;

/// Typed key into [`Attributes`].
///
/// Two keys with the same name but different value types never collide.
pub struct AttributeKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttributeKey<T> {}

impl<T> fmt::Debug for AttributeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributeKey({})", self.name)
    }
}

type Slot = (TypeId, &'static str);

/// Heterogeneous map phases use to pass side data to later phases.
#[derive(Default)]
pub struct Attributes {
    values: HashMap<Slot, Box<dyn Any + Send + Sync>>,
}

fn slot<T: 'static>(key: &AttributeKey<T>) -> Slot {
    (TypeId::of::<T>(), key.name)
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, returning the one it replaced.
    pub fn insert<T: Send + Sync + 'static>(&mut self, key: &AttributeKey<T>, value: T) -> Option<T> {
        self.values
            .insert(slot(key), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T: 'static>(&self, key: &AttributeKey<T>) -> Option<&T> {
        self.values.get(&slot(key)).and_then(|v| v.downcast_ref())
    }

    pub fn get_mut<T: 'static>(&mut self, key: &AttributeKey<T>) -> Option<&mut T> {
        self.values.get_mut(&slot(key)).and_then(|v| v.downcast_mut())
    }

    /// Like [`get`](Self::get), but a missing value is an error.
    pub fn require<T: 'static>(&self, key: &AttributeKey<T>) -> Result<&T, PipelineError> {
        self.get(key).ok_or(PipelineError::MissingAttribute(key.name))
    }

    pub fn remove<T: 'static>(&mut self, key: &AttributeKey<T>) -> Option<T> {
        self.values
            .remove(&slot(key))
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    pub fn contains<T: 'static>(&self, key: &AttributeKey<T>) -> bool {
        self.values.contains_key(&slot(key))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.values.keys().map(|(_, name)| name))
            .finish()
    }
}

/// How the node sequence ended, visible to `Finally` nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    Failed,
}

/// Mutable state for one execution of a pipeline.
///
/// A context is created fresh per attempt; the configuration it runs
/// against is shared.
pub struct PipelineContext<C, E> {
    data: C,
    attributes: Attributes,
    collector: ExceptionCollector<E>,
    budget: RetryBudget,
    span: Span,
    last_phase: Option<String>,
    outcome: Option<ExecutionOutcome>,
}

impl<C, E> PipelineContext<C, E> {
    pub fn new(data: C, budget: RetryBudget) -> Self {
        Self {
            data,
            attributes: Attributes::new(),
            collector: ExceptionCollector::new(),
            budget,
            span: tracing::info_span!("pipeline"),
            last_phase: None,
            outcome: None,
        }
    }

    /// Run the execution under `span` instead of the default one.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn data(&self) -> &C {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut C {
        &mut self.data
    }

    pub fn into_data(self) -> C {
        self.data
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    pub fn collector(&self) -> &ExceptionCollector<E> {
        &self.collector
    }

    pub fn collector_mut(&mut self) -> &mut ExceptionCollector<E> {
        &mut self.collector
    }

    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Name of the last phase that completed successfully.
    pub fn last_phase(&self) -> Option<&str> {
        self.last_phase.as_deref()
    }

    /// `None` while the node sequence is still running.
    pub fn outcome(&self) -> Option<ExecutionOutcome> {
        self.outcome
    }

    pub(crate) fn set_last_phase(&mut self, name: &str) {
        self.last_phase = Some(name.to_owned());
    }

    pub(crate) fn set_outcome(&mut self, outcome: ExecutionOutcome) {
        self.outcome = Some(outcome);
    }
}

impl<C: fmt::Debug, E> fmt::Debug for PipelineContext<C, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("data", &self.data)
            .field("attributes", &self.attributes)
            .field("failures", &self.collector.len())
            .field("last_phase", &self.last_phase)
            .field("outcome", &self.outcome)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNT: AttributeKey<u32> = AttributeKey::new("count");
    const COUNT_TEXT: AttributeKey<String> = AttributeKey::new("count");

    #[test]
    fn same_name_different_type_do_not_collide() {
        let mut attrs = Attributes::new();
        attrs.insert(&COUNT, 3);
        attrs.insert(&COUNT_TEXT, "three".to_string());

        assert_eq!(attrs.get(&COUNT), Some(&3));
        assert_eq!(attrs.get(&COUNT_TEXT).map(String::as_str), Some("three"));
        assert_eq!(attrs.len(), 2);
    }

    #[test]
    fn insert_returns_previous() {
        let mut attrs = Attributes::new();
        assert_eq!(attrs.insert(&COUNT, 1), None);
        assert_eq!(attrs.insert(&COUNT, 2), Some(1));
        *attrs.get_mut(&COUNT).unwrap() += 1;
        assert_eq!(attrs.remove(&COUNT), Some(3));
        assert!(!attrs.contains(&COUNT));
    }

    #[test]
    fn require_reports_missing_key() {
        let attrs = Attributes::new();
        assert_eq!(
            attrs.require(&COUNT),
            Err(PipelineError::MissingAttribute("count"))
        );
    }
}
