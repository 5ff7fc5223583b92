use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::rooms::RoomMultiplexer;

pub type ConnectionId = Uuid;

struct ConnectionHandle {
    user_id: Uuid,
    sender: UnboundedSender<Message>,
}

/// Tracks every live, authenticated connection.
///
/// Registration happens only after credential verification succeeds, so no
/// partially-authenticated connection is ever visible here. Each entry owns
/// the outbound channel for its socket; per-connection channels preserve the
/// order events were fanned out in.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection to its authenticated identity and hand back the
    /// receiving end of its outbound channel.
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        user_id: Uuid,
    ) -> UnboundedReceiver<Message> {
        let (tx, rx) = unbounded_channel();
        let mut guard = self.inner.write().await;
        guard.insert(connection_id, ConnectionHandle { user_id, sender: tx });
        rx
    }

    /// Drop a connection on transport close.
    ///
    /// Cascades into every room the connection had joined before the entry
    /// disappears, so a removed connection can never remain a fan-out target.
    pub async fn remove(&self, connection_id: ConnectionId, rooms: &RoomMultiplexer) {
        rooms.leave_all(connection_id).await;
        let mut guard = self.inner.write().await;
        guard.remove(&connection_id);
    }

    pub async fn lookup(&self, connection_id: ConnectionId) -> Option<Uuid> {
        let guard = self.inner.read().await;
        guard.get(&connection_id).map(|h| h.user_id)
    }

    /// Every live connection belonging to an identity (multi-device).
    pub async fn connections_for(&self, user_id: Uuid) -> Vec<ConnectionId> {
        let guard = self.inner.read().await;
        guard
            .iter()
            .filter(|(_, h)| h.user_id == user_id)
            .map(|(id, _)| *id)
            .collect()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        let guard = self.inner.read().await;
        guard.values().any(|h| h.user_id == user_id)
    }

    /// Queue a message for one connection. Returns false if the connection
    /// is gone or its channel is closed.
    pub async fn send_to(&self, connection_id: ConnectionId, message: Message) -> bool {
        let guard = self.inner.read().await;
        match guard.get(&connection_id) {
            Some(handle) => handle.sender.send(message).is_ok(),
            None => false,
        }
    }
}
