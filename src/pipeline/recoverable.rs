//! A phase with ordered fallbacks.

use async_trait::async_trait;

use crate::pipeline::context::PipelineContext;
use crate::pipeline::node::{Phase, PipelineFailure};

type BoxedPhase<C, E, I, O> = Box<dyn Phase<C, E, Input = I, Output = O>>;

/// Runs `primary`; on failure tries each fallback in order with the same
/// input.
///
/// Superseded failures go to the context's collector. Each fallback costs
/// one unit of the retry budget; once it is spent the latest failure is
/// returned as is.
pub struct RecoverablePhase<C, E, I, O> {
    name: String,
    primary: BoxedPhase<C, E, I, O>,
    fallbacks: Vec<BoxedPhase<C, E, I, O>>,
}

impl<C, E, I, O> RecoverablePhase<C, E, I, O>
where
    C: Send + 'static,
    E: PipelineFailure,
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new<P>(name: impl Into<String>, primary: P) -> Self
    where
        P: Phase<C, E, Input = I, Output = O> + 'static,
    {
        Self {
            name: name.into(),
            primary: Box::new(primary),
            fallbacks: Vec::new(),
        }
    }

    pub fn fallback<P>(mut self, phase: P) -> Self
    where
        P: Phase<C, E, Input = I, Output = O> + 'static,
    {
        self.fallbacks.push(Box::new(phase));
        self
    }
}

#[async_trait]
impl<C, E, I, O> Phase<C, E> for RecoverablePhase<C, E, I, O>
where
    C: Send + 'static,
    E: PipelineFailure,
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut PipelineContext<C, E>, input: I) -> Result<O, E> {
        let mut failure = match self.primary.run(ctx, input.clone()).await {
            Ok(output) => return Ok(output),
            Err(error) => error,
        };
        let mut failed = self.primary.name();

        for fallback in &self.fallbacks {
            if !ctx.budget().try_acquire() {
                tracing::warn!(phase = %self.name, failed, "Retry budget exhausted, skipping fallbacks");
                return Err(failure);
            }
            tracing::debug!(
                phase = %self.name,
                failed,
                fallback = fallback.name(),
                error = %failure,
                "Trying fallback"
            );
            ctx.collector_mut().collect(failure);

            match fallback.run(ctx, input.clone()).await {
                Ok(output) => return Ok(output),
                Err(error) => {
                    failure = error;
                    failed = fallback.name();
                }
            }
        }

        Err(failure)
    }
}
