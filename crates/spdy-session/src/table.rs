//! Connection-to-session association table

use crate::session::Session;
use dashmap::DashMap;
use tracing::debug;

/// Sessions keyed by the identity of the connection carrying them.
///
/// Owned by the transport integration layer; sessions know nothing about it.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: DashMap<String, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `session` with a connection, returning any session it replaces
    pub fn bind(&self, connection_id: impl Into<String>, session: Session) -> Option<Session> {
        let connection_id = connection_id.into();
        debug!(
            connection_id = %connection_id,
            session_id = %session.id(),
            "Binding session to connection"
        );
        self.sessions.insert(connection_id, session)
    }

    pub fn get(&self, connection_id: &str) -> Option<Session> {
        self.sessions
            .get(connection_id)
            .map(|entry| entry.value().clone())
    }

    pub fn unbind(&self, connection_id: &str) -> Option<Session> {
        self.sessions
            .remove(connection_id)
            .map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
