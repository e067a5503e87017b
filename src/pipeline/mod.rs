//! Checkpointed phase-execution engine.
//!
//! # Responsibilities
//! - Run an ordered, immutable node graph over a per-execution context
//! - Rewind to savepoints when a guarded phase fails
//! - Run every `Finally` node exactly once on every exit path
//! - Report the terminal failure with all superseded failures attached
//!
//! # Data Flow
//! ```text
//! PipelineBuilder (typed: In → ... → Out)
//!     → PipelineConfiguration::from_nodes (validated once)
//!     → execute(&mut PipelineContext, In)
//!         → Phase / Savepoint / JumpToSavepointOnFailure ... → Finish
//!         → Finally nodes, in declaration order
//!     → Result<Out, Suppressed<E>>
//! ```
//!
//! # Design Decisions
//! - The engine knows nothing about the protocol; login phases live in `sso`
//! - Node is an enum matched in a single executor loop
//! - Values between phases are type-erased; the builder guarantees the
//!   chain lines up, the executor downcasts once per boundary

pub mod builder;
pub mod collector;
pub mod context;
pub mod executor;
pub mod node;
pub mod recoverable;

pub use builder::{FinallyBuilder, PipelineBuilder};
pub use collector::ExceptionCollector;
pub use context::{AttributeKey, Attributes, ExecutionOutcome, PipelineContext};
pub use executor::PipelineConfiguration;
pub use node::{DynPhase, Finally, Node, Phase, PipelineFailure, Savepoint, SavepointId};
pub use recoverable::RecoverablePhase;

#[cfg(test)]
pub(crate) mod testing;
