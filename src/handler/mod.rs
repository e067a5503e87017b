//! Connection lifecycle.
//!
//! # Responsibilities
//! - Hold exactly one current [`State`] and serialise every transition
//! - Open the transport, run the login, then keep the connection alive
//! - Route decoded packets to response listeners and subscribers
//! - Replace closed handlers and retry recoverable failures ([`HandlerSelector`])
//!
//! # Data Flow
//! ```text
//! resume_connection
//!     → Connecting: Transport::connect → DecodePipeline::spawn → SsoProcessor::login
//!     → Loading:    SessionInitializer
//!     → Ok:         heartbeat task
//!
//! Transport ─frames─→ DecodePipeline ─packets─→ ConnectionDispatcher
//!     → PacketListeners (send_and_expect)
//!     → broadcast (subscribe_packets)
//!     → forced offline → ConnectionLost
//! ```
//!
//! # Design Decisions
//! - The current state is an `ArcSwap`; reads never lock
//! - Writers hold a mutex and may refuse a transition from a state other
//!   than the one they observed
//! - Only `close` aborts an in-flight connect attempt

pub mod context;
mod dispatcher;
mod heartbeat;
pub mod network;
pub mod selector;
pub mod state;

pub use context::{HandlerContext, HandlerContextBuilder, SessionInitializer};
pub use network::NetworkHandler;
pub use selector::HandlerSelector;
pub use state::{ConnectAttempt, State, StateKind};
