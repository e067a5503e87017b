//! Typed construction of pipeline configurations.
//!
//! ```text
//! PipelineBuilder<In, In>
//!     .then(A)                  → <In, A::Output>
//!     .savepoint(id)            (value must be Clone here)
//!     .then_or_jump(B, id)      → <In, B::Output>
//!     .finish()                 → FinallyBuilder<In, Out>
//!     .finally(X).finally(Y)
//!     .build()                  → PipelineConfiguration<In, Out>
//! ```

use std::marker::PhantomData;

use crate::error::ConfigurationError;
use crate::pipeline::executor::PipelineConfiguration;
use crate::pipeline::node::{Finally, Node, Phase, PipelineFailure, SavepointId};

/// Builds the node sequence up to `Finish`; `Cur` is the type flowing out
/// of the last node added.
pub struct PipelineBuilder<C, E, In, Cur> {
    nodes: Vec<Node<C, E>>,
    _types: PhantomData<fn(In) -> Cur>,
}

impl<C, E, In> PipelineBuilder<C, E, In, In>
where
    C: Send + 'static,
    E: PipelineFailure,
    In: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            _types: PhantomData,
        }
    }
}

impl<C, E, In> Default for PipelineBuilder<C, E, In, In>
where
    C: Send + 'static,
    E: PipelineFailure,
    In: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C, E, In, Cur> PipelineBuilder<C, E, In, Cur>
where
    C: Send + 'static,
    E: PipelineFailure,
    In: Send + 'static,
    Cur: Send + 'static,
{
    pub fn then<P>(mut self, phase: P) -> PipelineBuilder<C, E, In, P::Output>
    where
        P: Phase<C, E, Input = Cur> + 'static,
    {
        self.nodes.push(Node::phase(phase));
        self.retype()
    }

    /// Add a phase that rewinds to `target` when it fails.
    pub fn then_or_jump<P>(mut self, phase: P, target: SavepointId) -> PipelineBuilder<C, E, In, P::Output>
    where
        P: Phase<C, E, Input = Cur> + 'static,
    {
        self.nodes.push(Node::jump_on_failure(phase, target));
        self.retype()
    }

    pub fn savepoint(mut self, id: SavepointId) -> Self
    where
        Cur: Clone,
    {
        self.nodes.push(Node::savepoint::<Cur>(id));
        self
    }

    pub fn finish(mut self) -> FinallyBuilder<C, E, In, Cur> {
        self.nodes.push(Node::Finish);
        FinallyBuilder {
            nodes: self.nodes,
            _types: PhantomData,
        }
    }

    fn retype<Next>(self) -> PipelineBuilder<C, E, In, Next> {
        PipelineBuilder {
            nodes: self.nodes,
            _types: PhantomData,
        }
    }
}

/// Collects `Finally` nodes after `Finish`.
pub struct FinallyBuilder<C, E, In, Out> {
    nodes: Vec<Node<C, E>>,
    _types: PhantomData<fn(In) -> Out>,
}

impl<C, E, In, Out> FinallyBuilder<C, E, In, Out>
where
    C: Send + 'static,
    E: PipelineFailure,
    In: Send + 'static,
    Out: Send + 'static,
{
    pub fn finally<F: Finally<C, E> + 'static>(mut self, cleanup: F) -> Self {
        self.nodes.push(Node::finally(cleanup));
        self
    }

    pub fn build(self) -> Result<PipelineConfiguration<C, E, In, Out>, ConfigurationError> {
        PipelineConfiguration::from_nodes(self.nodes)
    }
}
