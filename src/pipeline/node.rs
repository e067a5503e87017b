//! Node kinds and the phase traits they wrap.

use std::any::Any;
use std::fmt;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::pipeline::context::PipelineContext;

/// Value threaded between phases once erased.
pub type Value = Box<dyn Any + Send>;

/// Bounds every pipeline error type must meet.
///
/// `Clone` lets the engine hand out the terminal failure while the
/// collector keeps its history.
pub trait PipelineFailure:
    Clone + fmt::Display + Send + Sync + 'static + From<PipelineError>
{
}

impl<T> PipelineFailure for T where
    T: Clone + fmt::Display + Send + Sync + 'static + From<PipelineError>
{
}

/// Identifies a rewind target within one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SavepointId(pub u32);

impl fmt::Display for SavepointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One step of a pipeline: transforms `Input` into `Output`, or fails.
///
/// Generic implementations need `C: Send + 'static` and `E: PipelineFailure`
/// to be accepted by the builder.
#[async_trait]
pub trait Phase<C, E>: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &str;

    async fn run(
        &self,
        ctx: &mut PipelineContext<C, E>,
        input: Self::Input,
    ) -> Result<Self::Output, E>;
}

/// Cleanup that runs after the node sequence ends, however it ended.
#[async_trait]
pub trait Finally<C, E>: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &mut PipelineContext<C, E>) -> Result<(), E>;
}

#[async_trait]
trait ErasedPhase<C, E>: Send + Sync {
    fn name(&self) -> &str;

    async fn run_erased(&self, ctx: &mut PipelineContext<C, E>, input: Value) -> Result<Value, E>;
}

struct Erased<P>(P);

#[async_trait]
impl<C, E, P> ErasedPhase<C, E> for Erased<P>
where
    C: Send + 'static,
    E: PipelineFailure,
    P: Phase<C, E>,
{
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn run_erased(&self, ctx: &mut PipelineContext<C, E>, input: Value) -> Result<Value, E> {
        let input = input.downcast::<P::Input>().map_err(|_| {
            E::from(PipelineError::TypeMismatch {
                node: self.0.name().to_owned(),
            })
        })?;
        let output = self.0.run(ctx, *input).await?;
        Ok(Box::new(output))
    }
}

/// A phase with its input and output types erased.
pub struct DynPhase<C, E> {
    inner: Box<dyn ErasedPhase<C, E>>,
}

impl<C, E> DynPhase<C, E>
where
    C: Send + 'static,
    E: PipelineFailure,
{
    pub fn new<P: Phase<C, E> + 'static>(phase: P) -> Self {
        Self {
            inner: Box::new(Erased(phase)),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub(crate) async fn run(&self, ctx: &mut PipelineContext<C, E>, input: Value) -> Result<Value, E> {
        self.inner.run_erased(ctx, input).await
    }
}

type Snapshot = fn(&Value) -> Option<Value>;

fn snapshot_of<T: Clone + Send + 'static>(value: &Value) -> Option<Value> {
    value
        .downcast_ref::<T>()
        .map(|v| Box::new(v.clone()) as Value)
}

/// A rewind target that remembers the value flowing past it.
pub struct Savepoint {
    id: SavepointId,
    snapshot: Snapshot,
}

impl Savepoint {
    /// A savepoint for a pipeline whose value at this point is a `T`.
    pub fn new<T: Clone + Send + 'static>(id: SavepointId) -> Self {
        Self {
            id,
            snapshot: snapshot_of::<T>,
        }
    }

    pub fn id(&self) -> SavepointId {
        self.id
    }

    /// Clone the threaded value, or `None` if it is not the declared type.
    pub(crate) fn snapshot(&self, value: &Value) -> Option<Value> {
        (self.snapshot)(value)
    }
}

/// One entry of a [`PipelineConfiguration`](crate::pipeline::PipelineConfiguration).
pub enum Node<C, E> {
    Phase(DynPhase<C, E>),
    Savepoint(Savepoint),
    JumpToSavepointOnFailure {
        phase: DynPhase<C, E>,
        target: SavepointId,
    },
    Finish,
    Finally(Box<dyn Finally<C, E>>),
}

impl<C, E> Node<C, E>
where
    C: Send + 'static,
    E: PipelineFailure,
{
    pub fn phase<P: Phase<C, E> + 'static>(phase: P) -> Self {
        Node::Phase(DynPhase::new(phase))
    }

    pub fn savepoint<T: Clone + Send + 'static>(id: SavepointId) -> Self {
        Node::Savepoint(Savepoint::new::<T>(id))
    }

    pub fn jump_on_failure<P: Phase<C, E> + 'static>(phase: P, target: SavepointId) -> Self {
        Node::JumpToSavepointOnFailure {
            phase: DynPhase::new(phase),
            target,
        }
    }

    pub fn finally<F: Finally<C, E> + 'static>(cleanup: F) -> Self {
        Node::Finally(Box::new(cleanup))
    }

    /// Human-readable label for logs and configuration errors.
    pub fn label(&self) -> String {
        match self {
            Node::Phase(p) => p.name().to_owned(),
            Node::Savepoint(s) => format!("Savepoint({})", s.id),
            Node::JumpToSavepointOnFailure { phase, target } => {
                format!("{} (on failure jump to {})", phase.name(), target)
            }
            Node::Finish => "Finish".to_owned(),
            Node::Finally(f) => format!("Finally({})", f.name()),
        }
    }
}
