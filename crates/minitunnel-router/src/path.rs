//! Path-prefix routing for public HTTP requests
//!
//! A public request either names its tunnel explicitly as the first path segment
//! (`/<client-id>/rest`) or is routed to the only connected client. The explicit
//! form is recognised by shape: a first segment longer than 30 bytes containing a
//! hyphen. Anything else falls back to the single registered client, which lets
//! root-relative asset requests issued by browsers reach the tunnel.

use crate::registry::{ClientRegistry, SoleEntry};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Segments at most this long are never treated as client IDs
const MIN_CLIENT_ID_LEN: usize = 30;

/// Routing errors, each mapped to the HTTP status shown to the public caller
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("No agents connected")]
    NoAgents,

    #[error("Multiple agents connected - please use full tunnel URL: http://server:port/<client-id>/path")]
    Ambiguous { connected: usize },

    #[error("Tunnel not found")]
    TunnelNotFound(String),
}

impl RouteError {
    pub fn status_code(&self) -> u16 {
        match self {
            RouteError::NoAgents => 503,
            RouteError::Ambiguous { .. } => 400,
            RouteError::TunnelNotFound(_) => 404,
        }
    }
}

/// A resolved route
pub struct Route<T> {
    pub client_id: String,
    /// Path (and query) to forward to the agent
    pub forwarded_path: String,
    pub session: Arc<T>,
}

impl<T> fmt::Debug for Route<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("client_id", &self.client_id)
            .field("forwarded_path", &self.forwarded_path)
            .finish()
    }
}

/// Whether a path segment has the shape of an explicit client ID
pub fn is_client_id_segment(segment: &str) -> bool {
    segment.len() > MIN_CLIENT_ID_LEN && segment.contains('-')
}

/// Resolves public request paths against a [`ClientRegistry`]
pub struct PathRouter<T> {
    registry: ClientRegistry<T>,
}

impl<T> PathRouter<T> {
    pub fn new(registry: ClientRegistry<T>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ClientRegistry<T> {
        &self.registry
    }

    /// Route a request path, re-appending `query` to the forwarded path
    pub fn route(&self, path: &str, query: Option<&str>) -> Result<Route<T>, RouteError> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let (first, rest) = match trimmed.split_once('/') {
            Some((first, rest)) => (first, Some(rest)),
            None => (trimmed, None),
        };

        let (client_id, mut forwarded_path, session) = if is_client_id_segment(first) {
            let forwarded = match rest {
                Some(rest) if !rest.is_empty() => format!("/{}", rest),
                _ => "/".to_string(),
            };
            let session = self
                .registry
                .get(first)
                .ok_or_else(|| RouteError::TunnelNotFound(first.to_string()))?;
            (first.to_string(), forwarded, session)
        } else {
            match self.registry.sole_entry() {
                SoleEntry::One(client_id, session) => (client_id, path.to_string(), session),
                SoleEntry::Empty => return Err(RouteError::NoAgents),
                SoleEntry::Many(connected) => return Err(RouteError::Ambiguous { connected }),
            }
        };

        if let Some(query) = query.filter(|q| !q.is_empty()) {
            forwarded_path.push('?');
            forwarded_path.push_str(query);
        }

        debug!("Routed {} to client {} as {}", path, client_id, forwarded_path);

        Ok(Route {
            client_id,
            forwarded_path,
            session,
        })
    }
}

impl<T> Clone for PathRouter<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<T> fmt::Debug for PathRouter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathRouter")
            .field("registry", &self.registry)
            .finish()
    }
}
