//! Connected-client bookkeeping.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};

/// Hostname recorded when the peer address cannot be obtained.
pub const UNKNOWN_HOST: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSession {
    pub id: SessionId,
    pub hostname: String,
    pub address: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
}

impl ClientSession {
    pub fn new(id: SessionId, address: Option<SocketAddr>) -> Self {
        Self {
            id,
            hostname: address
                .map(|a| a.ip().to_string())
                .unwrap_or_else(|| UNKNOWN_HOST.to_string()),
            address,
            connected_at: Utc::now(),
        }
    }
}

/// Sessions currently connected, keyed by id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, ClientSession>,
}

impl SessionRegistry {
    pub fn insert(&mut self, session: ClientSession) {
        self.sessions.insert(session.id, session);
    }

    pub fn remove(&mut self, id: SessionId) -> Option<ClientSession> {
        self.sessions.remove(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<&ClientSession> {
        self.sessions.get(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientSession> {
        self.sessions.values()
    }
}
