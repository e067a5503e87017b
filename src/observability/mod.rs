//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events and spans (one span per login pipeline, one per phase)
//!     → metrics.rs (counters, gauges)
//!     → observer.rs (state transition hooks, LoggingObserver by default)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, JSON optional)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Structured logging for machine parsing
//! - Metrics are cheap (atomic increments); without an installed recorder
//!   they are no-ops

pub mod logging;
pub mod metrics;
pub mod observer;

pub use logging::init_logging;
pub use metrics::init_metrics;
pub use observer::{LoggingObserver, ObserverChain, StateObserver};
