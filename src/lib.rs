//! Asynchronous client core for an instant-messaging binary protocol.

pub mod config;
pub mod crypto;
pub mod decode;
pub mod error;
pub mod handler;
pub mod net;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod sso;

pub use config::schema::ClientConfig;
pub use error::{Error, Result};
pub use handler::{HandlerContext, HandlerSelector, NetworkHandler, StateKind};
