//! Session Registry
//!
//! The single piece of state shared between connection tasks. Holds every
//! authenticated [`Session`] keyed by connection ID, enforces display-name
//! uniqueness, and hands out consistent snapshots for broadcasting.
//!
//! All mutations happen under one write lock, so a name check and the insert
//! that follows it are atomic with respect to other registrations. Closing the
//! registry takes the same lock: once [`Registry::close`] returns, every later
//! registration is refused and [`Registry::sessions`] is the final set.

use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::{watch, RwLock};

use super::session::{ConnectionId, Outbox, Session};

/// Concurrent store of active sessions
pub struct Registry {
    inner: RwLock<RegistryInner>,
    /// Number of registered sessions, published on every mutation
    population: watch::Sender<usize>,
    /// Flipped once when the server starts shutting down
    closing: watch::Sender<bool>,
}

#[derive(Default)]
struct RegistryInner {
    /// ConnectionId → (join sequence, session)
    sessions: HashMap<ConnectionId, (u64, Session)>,
    /// Display name → ConnectionId
    names: HashMap<String, ConnectionId>,
    /// Join sequence → ConnectionId, gives the participant list its order
    order: BTreeMap<u64, ConnectionId>,
    next_seq: u64,
    closed: bool,
}

impl Registry {
    pub fn new() -> Self {
        let (population, _) = watch::channel(0);
        let (closing, _) = watch::channel(false);
        Self {
            inner: RwLock::new(RegistryInner::default()),
            population,
            closing,
        }
    }

    /// Register an authenticated session under the outbox's connection ID.
    ///
    /// Fails without mutating anything if the registry is closed, the name
    /// is held by another session, or the connection is already registered.
    pub async fn try_register(
        &self,
        outbox: &Outbox,
        requested_name: &str,
    ) -> Result<Session, RegistryError> {
        let mut inner = self.inner.write().await;
        let id = outbox.connection_id();

        if inner.closed {
            return Err(RegistryError::Closed);
        }
        if inner.sessions.contains_key(id) {
            return Err(RegistryError::AlreadyRegistered(id.to_string()));
        }
        if inner.names.contains_key(requested_name) {
            return Err(RegistryError::NameConflict(requested_name.to_string()));
        }

        let session = Session::new(outbox.clone(), requested_name.to_string());
        let seq = inner.next_seq;
        inner.next_seq += 1;

        inner
            .names
            .insert(session.display_name.clone(), session.connection_id.clone());
        inner.order.insert(seq, session.connection_id.clone());
        inner
            .sessions
            .insert(session.connection_id.clone(), (seq, session.clone()));

        self.population.send_replace(inner.sessions.len());

        tracing::info!(
            connection_id = %session.connection_id,
            username = %session.display_name,
            participants = inner.sessions.len(),
            "Session registered"
        );
        Ok(session)
    }

    /// Remove a session. Returns `None` if it was not registered.
    pub async fn unregister(&self, id: &str) -> Option<Session> {
        let mut inner = self.inner.write().await;
        let (seq, session) = inner.sessions.remove(id)?;

        inner.names.remove(&session.display_name);
        inner.order.remove(&seq);
        self.population.send_replace(inner.sessions.len());

        tracing::info!(
            connection_id = %id,
            username = %session.display_name,
            participants = inner.sessions.len(),
            "Session unregistered"
        );
        Some(session)
    }

    /// Participant names in join order, read under a single lock
    pub async fn snapshot(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .ordered()
            .map(|session| session.display_name.clone())
            .collect()
    }

    /// Names and session handles in join order, read under a single lock
    pub async fn roster(&self) -> (Vec<String>, Vec<Session>) {
        let inner = self.inner.read().await;
        let sessions: Vec<Session> = inner.ordered().cloned().collect();
        let names = sessions
            .iter()
            .map(|session| session.display_name.clone())
            .collect();
        (names, sessions)
    }

    /// Session handles in join order, read under a single lock
    pub async fn sessions(&self) -> Vec<Session> {
        let inner = self.inner.read().await;
        inner.ordered().cloned().collect()
    }

    pub async fn lookup(&self, id: &str) -> Option<Session> {
        let inner = self.inner.read().await;
        inner.sessions.get(id).map(|(_, session)| session.clone())
    }

    pub async fn lookup_by_name(&self, name: &str) -> Option<Session> {
        let inner = self.inner.read().await;
        let id = inner.names.get(name)?;
        inner.sessions.get(id).map(|(_, session)| session.clone())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Refuse all further registrations and return the sessions still
    /// registered at that point.
    pub async fn close(&self) -> Vec<Session> {
        let mut inner = self.inner.write().await;
        inner.closed = true;
        self.closing.send_replace(true);
        inner.ordered().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        *self.closing.borrow()
    }

    /// Resolves once the registry has been closed
    pub async fn closed(&self) {
        let mut closing = self.closing.subscribe();
        let _ = closing.wait_for(|closed| *closed).await;
    }

    /// Resolves once no session is registered
    pub async fn drained(&self) {
        let mut population = self.population.subscribe();
        // The sender lives as long as `self`, so this only ends on an empty registry
        let _ = population.wait_for(|count| *count == 0).await;
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryInner {
    fn ordered(&self) -> impl Iterator<Item = &Session> {
        self.order
            .values()
            .filter_map(move |id| self.sessions.get(id).map(|(_, session)| session))
    }
}

/// Errors returned by registry mutations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Username '{0}' is already taken")]
    NameConflict(String),

    #[error("Connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),

    #[error("Server is shutting down")]
    Closed,
}
