//! Candidate server addresses.
//!
//! # Responsibilities
//! - Hand out each configured server once per pass (`poll_current`)
//! - Always produce some server, cycling when a pass is exhausted
//!   (`poll_any`)

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// A host/port pair the client can connect to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Ordered server candidates.
#[derive(Debug)]
pub struct ServerList {
    preferred: Vec<ServerAddress>,
    pending: Mutex<VecDeque<ServerAddress>>,
}

impl ServerList {
    pub fn new(servers: Vec<ServerAddress>) -> Result<Self, ConfigurationError> {
        if servers.is_empty() {
            return Err(ConfigurationError::Invalid("server list is empty".into()));
        }
        Ok(Self {
            pending: Mutex::new(servers.iter().cloned().collect()),
            preferred: servers,
        })
    }

    /// Next untried server of the current pass, or `None` once the pass is
    /// exhausted.
    pub fn poll_current(&self) -> Option<ServerAddress> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Like [`poll_current`](Self::poll_current), but starts a new pass when
    /// the current one is exhausted.
    pub fn poll_any(&self) -> ServerAddress {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.is_empty() {
            tracing::debug!(servers = self.preferred.len(), "Server list exhausted, starting over");
            pending.extend(self.preferred.iter().cloned());
        }
        match pending.pop_front() {
            Some(address) => address,
            // `preferred` is never empty
            None => self.preferred[0].clone(),
        }
    }

    /// Start a fresh pass without waiting for the current one to run out.
    pub fn refresh(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.clear();
        pending.extend(self.preferred.iter().cloned());
    }

    pub fn addresses(&self) -> &[ServerAddress] {
        &self.preferred
    }
}
