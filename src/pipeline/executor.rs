//! Validated node sequences and the loop that runs them.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;

use tracing::Instrument;

use crate::error::{ConfigurationError, PipelineError, Suppressed};
use crate::pipeline::context::{ExecutionOutcome, PipelineContext};
use crate::pipeline::node::{DynPhase, Node, PipelineFailure, Savepoint, SavepointId, Value};

/// An immutable, validated pipeline taking `In` and producing `Out`.
///
/// Built once and shared; each run gets its own [`PipelineContext`].
pub struct PipelineConfiguration<C, E, In, Out> {
    nodes: Vec<Node<C, E>>,
    _types: PhantomData<fn(In) -> Out>,
}

impl<C, E, In, Out> PipelineConfiguration<C, E, In, Out>
where
    C: Send + 'static,
    E: PipelineFailure,
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Validate a node sequence.
    ///
    /// Types are not checked here; a mismatch surfaces as
    /// [`PipelineError::TypeMismatch`] when the pipeline runs. Prefer
    /// [`PipelineBuilder`](crate::pipeline::PipelineBuilder), which checks
    /// them at compile time.
    pub fn from_nodes(nodes: Vec<Node<C, E>>) -> Result<Self, ConfigurationError> {
        let mut savepoints = HashSet::new();
        let mut finished = false;
        let mut has_finally = false;

        for node in &nodes {
            match node {
                Node::Finally(_) => has_finally = true,
                Node::Finish if finished => return Err(ConfigurationError::DuplicateFinish),
                Node::Finish => finished = true,
                other if finished => {
                    return Err(ConfigurationError::UnreachableNode(other.label()));
                }
                Node::Savepoint(savepoint) => {
                    if !savepoints.insert(savepoint.id()) {
                        return Err(ConfigurationError::DuplicateSavepoint(savepoint.id()));
                    }
                }
                Node::JumpToSavepointOnFailure { target, .. } => {
                    if !savepoints.contains(target) {
                        return Err(ConfigurationError::UnknownJumpTarget(*target));
                    }
                }
                Node::Phase(_) => {}
            }
        }

        if !finished {
            return Err(ConfigurationError::MissingFinish);
        }
        if !has_finally {
            return Err(ConfigurationError::MissingFinally);
        }

        Ok(Self {
            nodes,
            _types: PhantomData,
        })
    }

    pub fn nodes(&self) -> &[Node<C, E>] {
        &self.nodes
    }

    /// Run the pipeline to completion.
    ///
    /// Every `Finally` node runs exactly once, whatever the outcome. On
    /// failure the returned error carries every failure the context
    /// collected before it.
    pub async fn execute(&self, ctx: &mut PipelineContext<C, E>, input: In) -> Result<Out, Suppressed<E>> {
        let span = ctx.span().clone();
        async move {
            let result = self.run_nodes(ctx, Box::new(input)).await;
            ctx.set_outcome(match result {
                Ok(_) => ExecutionOutcome::Succeeded,
                Err(_) => ExecutionOutcome::Failed,
            });

            let finally_failed = self.run_finally(ctx).await;

            match result {
                Err(error) => {
                    tracing::debug!(error = %error, failures = ctx.collector().len(), "Pipeline failed");
                    Err(ctx.collector_mut().collect_get(error))
                }
                Ok(_) if finally_failed => match ctx.collector().throw_last() {
                    Some(thrown) => Err(thrown),
                    None => Err(ctx
                        .collector_mut()
                        .collect_get(E::from(PipelineError::Unterminated))),
                },
                Ok(value) => value.downcast::<Out>().map(|out| *out).map_err(|_| {
                    ctx.collector_mut().collect_get(E::from(PipelineError::TypeMismatch {
                        node: "Finish".to_owned(),
                    }))
                }),
            }
        }
        .instrument(span)
        .await
    }

    async fn run_nodes(&self, ctx: &mut PipelineContext<C, E>, mut value: Value) -> Result<Value, E> {
        let mut saved: HashMap<SavepointId, (usize, &Savepoint, Value)> = HashMap::new();
        let mut index = 0;

        while let Some(node) = self.nodes.get(index) {
            index += 1;
            match node {
                Node::Phase(phase) => value = run_phase(phase, ctx, value).await?,
                Node::Savepoint(savepoint) => {
                    let held = savepoint.snapshot(&value).ok_or_else(|| mismatch(node))?;
                    saved.insert(savepoint.id(), (index, savepoint, held));
                }
                Node::JumpToSavepointOnFailure { phase, target } => {
                    match run_phase(phase, ctx, value).await {
                        Ok(next) => value = next,
                        Err(error) => {
                            let Some((resume_at, savepoint, held)) = saved.get(target) else {
                                return Err(error);
                            };
                            if !ctx.budget().try_acquire() {
                                tracing::warn!(
                                    phase = phase.name(),
                                    savepoint = %target,
                                    error = %error,
                                    "Retry budget exhausted, not rewinding"
                                );
                                return Err(error);
                            }
                            tracing::debug!(
                                phase = phase.name(),
                                savepoint = %target,
                                error = %error,
                                "Phase failed, rewinding to savepoint"
                            );
                            ctx.collector_mut().collect(error);
                            value = savepoint.snapshot(held).ok_or_else(|| mismatch(node))?;
                            index = *resume_at;
                        }
                    }
                }
                Node::Finish => return Ok(value),
                Node::Finally(_) => {}
            }
        }

        Err(E::from(PipelineError::Unterminated))
    }

    /// Returns whether any `Finally` node failed.
    async fn run_finally(&self, ctx: &mut PipelineContext<C, E>) -> bool {
        let mut failed = false;
        for node in &self.nodes {
            let Node::Finally(cleanup) = node else {
                continue;
            };
            let span = tracing::debug_span!("finally", name = cleanup.name());
            if let Err(error) = cleanup.run(ctx).instrument(span).await {
                tracing::warn!(finally = cleanup.name(), error = %error, "Finally node failed");
                ctx.collector_mut().collect(error);
                failed = true;
            }
        }
        failed
    }
}

async fn run_phase<C, E>(phase: &DynPhase<C, E>, ctx: &mut PipelineContext<C, E>, input: Value) -> Result<Value, E>
where
    C: Send + 'static,
    E: PipelineFailure,
{
    let span = tracing::debug_span!("phase", name = phase.name());
    let output = phase.run(ctx, input).instrument(span).await?;
    ctx.set_last_phase(phase.name());
    Ok(output)
}

fn mismatch<C, E>(node: &Node<C, E>) -> E
where
    C: Send + 'static,
    E: PipelineFailure,
{
    E::from(PipelineError::TypeMismatch { node: node.label() })
}

impl<C, E, In, Out> fmt::Debug for PipelineConfiguration<C, E, In, Out>
where
    C: Send + 'static,
    E: PipelineFailure,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.nodes.iter().map(Node::label))
            .finish()
    }
}
