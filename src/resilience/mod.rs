//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Failed connect / login step:
//!     → retries.rs (RetryBudget: is another attempt allowed?)
//!     → backoff.rs (how long to wait before the next handler is tried)
//! ```
//!
//! # Design Decisions
//! - One budget is shared by savepoint jumps, recoverable fallbacks and
//!   outer reconnects, so a misbehaving server cannot loop forever
//! - The budget is reset once the handler reaches `Ok`

pub mod backoff;
pub mod retries;

pub use backoff::{calculate_backoff, Backoff};
pub use retries::RetryBudget;
