//! Live charge-point registry
//!
//! Process-wide map from connection identity to session, shared by the
//! connection tasks and the control plane. Entries are inserted on accept and
//! removed synchronously when the transport closes; a reconnect under the
//! same identity replaces the prior entry (last-connected-wins).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::session::Session;

#[derive(Default)]
pub struct Registry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a session, replacing any prior connection under the same
    /// identity. The superseded session keeps its transport but is no longer
    /// reachable through the registry.
    pub fn register(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        let prior = self
            .sessions
            .write()
            .insert(session.identity().to_owned(), session.clone());

        if prior.is_some() {
            warn!(
                "charge point reconnected, prior session superseded: {}",
                session.identity()
            );
        } else {
            info!("charge point registered: {}", session.identity());
        }

        session
    }

    /// Remove a session if it is still the one registered under its identity.
    ///
    /// Removal is by identity and instance: a superseded connection's cleanup
    /// must not evict its replacement. No-op when the entry is already gone.
    pub fn unregister(&self, session: &Arc<Session>) {
        let mut sessions = self.sessions.write();
        if let Some(current) = sessions.get(session.identity()) {
            if Arc::ptr_eq(current, session) {
                sessions.remove(session.identity());
                info!("charge point unregistered: {}", session.identity());
            }
        }
    }

    /// Session currently registered under an identity
    pub fn lookup(&self, identity: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(identity).cloned()
    }

    /// Identities of all live sessions, in no particular order
    pub fn identities(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
