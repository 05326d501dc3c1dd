//! Endpoint selection by server role.
//!
//! A [`ServerPool`] holds the master endpoints, the replica endpoints and their
//! union, each as an [`EndpointPool`] with its own round-robin cursor. The cursors
//! are the only state shared between concurrent calls.

use crate::error::{DbError, DbResult};
use crate::models::mask_endpoint;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Which endpoint group a call draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerRole {
    /// Writable endpoints
    #[default]
    Master,
    /// Read-only endpoints
    Replica,
    /// Either group
    Any,
}

impl std::fmt::Display for ServerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Replica => write!(f, "replica"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// How an endpoint is chosen within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PollingMode {
    /// Rotate through the group on successive calls
    #[default]
    RoundRobin,
    /// Always use the first endpoint of the group
    Fixed,
}

/// Immutable endpoint list with a round-robin cursor.
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<String>,
    cursor: AtomicUsize,
}

impl EndpointPool {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn first(&self) -> Option<&str> {
        self.endpoints.first().map(String::as_str)
    }

    /// Index of the next endpoint; advances the cursor.
    ///
    /// The stored cursor is always kept in `[0, len)`, so the returned index is in
    /// range under any interleaving of concurrent callers.
    pub fn next_index(&self) -> Option<usize> {
        let len = self.endpoints.len();
        if len == 0 {
            return None;
        }
        let previous = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
            .unwrap_or_else(|c| c);
        Some(previous % len)
    }

    /// Next endpoint in round-robin order.
    pub fn next(&self) -> Option<&str> {
        self.next_index().map(|idx| self.endpoints[idx].as_str())
    }
}

/// Master, replica and union pools plus the polling mode.
#[derive(Debug)]
pub struct ServerPool {
    master: EndpointPool,
    replica: EndpointPool,
    all: EndpointPool,
    polling: PollingMode,
}

impl ServerPool {
    pub fn new(masters: Vec<String>, replicas: Vec<String>, polling: PollingMode) -> Self {
        let all = masters.iter().chain(replicas.iter()).cloned().collect();
        Self {
            master: EndpointPool::new(masters),
            replica: EndpointPool::new(replicas),
            all: EndpointPool::new(all),
            polling,
        }
    }

    pub fn polling(&self) -> PollingMode {
        self.polling
    }

    /// Endpoint pool backing a role.
    pub fn pool(&self, role: ServerRole) -> &EndpointPool {
        match role {
            ServerRole::Master => &self.master,
            ServerRole::Replica => &self.replica,
            ServerRole::Any => &self.all,
        }
    }

    /// Select an endpoint for a role.
    pub fn select(&self, role: ServerRole) -> DbResult<&str> {
        let pool = self.pool(role);
        let endpoint = match self.polling {
            PollingMode::RoundRobin => pool.next(),
            PollingMode::Fixed => pool.first(),
        }
        .ok_or_else(|| DbError::configuration(format!("no {} endpoints configured", role)))?;

        debug!(
            role = %role,
            polling = ?self.polling,
            endpoint = %mask_endpoint(endpoint),
            "Selected endpoint"
        );
        Ok(endpoint)
    }
}
