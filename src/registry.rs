//! Connection registry for live inbound sessions
//!
//! Tracks every authenticated WebSocket session and its send queue. The lock
//! guards only the in-memory map; sends happen against the queue sender after
//! the lock is released. Broadcast iteration works on a point-in-time copy,
//! so concurrent add/remove never invalidates an in-flight fan-out.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// One authenticated inbound connection.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub addr: SocketAddr,
    /// Transitions false -> true exactly once; sessions are only registered
    /// after that transition.
    pub authenticated: bool,
    /// Outbound queue drained by the connection's single writer task.
    pub tx: mpsc::UnboundedSender<String>,
}

impl Session {
    /// Create an authenticated session around its outbound queue sender.
    pub fn new(addr: SocketAddr, tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            addr,
            authenticated: true,
            tx,
        }
    }
}

/// Thread-safe registry of live sessions.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    sessions: Arc<Mutex<HashMap<Uuid, Session>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Called once, post-authentication, before the
    /// session is exposed to broadcasts.
    pub fn add(&self, session: Session) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(session.id, session);
        }
    }

    /// Remove a session. Idempotent.
    pub fn remove(&self, id: Uuid) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&id);
        }
    }

    /// Point-in-time copy of the session list for fan-out iteration.
    pub fn snapshot(&self) -> Vec<(Uuid, mpsc::UnboundedSender<String>)> {
        match self.sessions.lock() {
            Ok(sessions) => sessions
                .iter()
                .map(|(id, session)| (*id, session.tx.clone()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every session. Closing the send queues unblocks each connection's
    /// writer task, which then closes its socket.
    pub fn close_all(&self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.clear();
        }
    }
}
