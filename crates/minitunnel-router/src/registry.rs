//! Concurrent registry of connected clients

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Result of asking the registry for its only entry
#[derive(Debug)]
pub enum SoleEntry<T> {
    Empty,
    One(String, Arc<T>),
    Many(usize),
}

/// Registry mapping client IDs to shared session handles
///
/// Cloning is cheap and every clone sees the same entries. Lookups, registrations
/// and removals from independent tasks need no external locking.
pub struct ClientRegistry<T> {
    clients: Arc<DashMap<String, Arc<T>>>,
}

impl<T> ClientRegistry<T> {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
        }
    }

    /// Register a client under a fresh ID
    ///
    /// Returns `false` if the ID is already taken.
    pub fn register(&self, client_id: impl Into<String>, session: Arc<T>) -> bool {
        let client_id = client_id.into();
        match self.clients.entry(client_id) {
            Entry::Occupied(entry) => {
                trace!("Client ID already registered: {}", entry.key());
                false
            }
            Entry::Vacant(entry) => {
                trace!("Registered client {}", entry.key());
                entry.insert(session);
                true
            }
        }
    }

    /// Remove a client, returning its session if it was registered
    pub fn remove(&self, client_id: &str) -> Option<Arc<T>> {
        let removed = self.clients.remove(client_id).map(|(_, session)| session);
        if removed.is_some() {
            trace!("Removed client {}", client_id);
        }
        removed
    }

    pub fn get(&self, client_id: &str) -> Option<Arc<T>> {
        self.clients
            .get(client_id)
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// IDs of all registered clients, in no particular order
    pub fn client_ids(&self) -> Vec<String> {
        self.clients.iter().map(|entry| entry.key().clone()).collect()
    }

    /// The registered client if there is exactly one
    ///
    /// Counts and captures in a single pass, so the returned entry was present
    /// at the moment the count was taken.
    pub fn sole_entry(&self) -> SoleEntry<T> {
        let mut found = None;
        let mut count = 0;

        for entry in self.clients.iter() {
            count += 1;
            if count == 1 {
                found = Some((entry.key().clone(), entry.value().clone()));
            }
        }

        match (count, found) {
            (1, Some((client_id, session))) => SoleEntry::One(client_id, session),
            (0, _) => SoleEntry::Empty,
            (count, _) => SoleEntry::Many(count),
        }
    }
}

impl<T> Clone for ClientRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            clients: self.clients.clone(),
        }
    }
}

impl<T> Default for ClientRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ClientRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.len())
            .finish()
    }
}
