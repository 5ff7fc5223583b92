use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::storage::MembershipStore;

use super::registry::ConnectionId;

type RoomSet = Arc<RwLock<HashSet<ConnectionId>>>;

struct Inner {
    /// conversation -> connections currently subscribed. Each room carries
    /// its own lock so traffic on one conversation never blocks another.
    rooms: RwLock<HashMap<Uuid, RoomSet>>,
    /// connection -> conversations joined, the reverse index.
    joined: Mutex<HashMap<ConnectionId, HashSet<Uuid>>>,
}

/// Per-conversation index of live subscriber connections.
///
/// Pure in-process state, rebuilt entirely from join/leave traffic. Both
/// directions of the index are updated together; membership *eligibility* is
/// re-checked against the external store on every join, never cached.
#[derive(Clone)]
pub struct RoomMultiplexer {
    inner: Arc<Inner>,
}

impl Default for RoomMultiplexer {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                rooms: RwLock::new(HashMap::new()),
                joined: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl RoomMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a conversation.
    ///
    /// The membership lookup happens before any lock is taken; index
    /// mutation itself does no I/O.
    pub async fn join(
        &self,
        membership: &dyn MembershipStore,
        connection_id: ConnectionId,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<()> {
        if !membership.is_member(conversation_id, user_id).await? {
            return Err(AppError::NotAMember);
        }

        let room = {
            let mut rooms = self.inner.rooms.write().await;
            rooms
                .entry(conversation_id)
                .or_insert_with(|| Arc::new(RwLock::new(HashSet::new())))
                .clone()
        };
        room.write().await.insert(connection_id);

        let mut joined = self.inner.joined.lock().await;
        joined
            .entry(connection_id)
            .or_default()
            .insert(conversation_id);

        Ok(())
    }

    pub async fn leave(&self, connection_id: ConnectionId, conversation_id: Uuid) {
        self.remove_from_room(connection_id, conversation_id).await;

        let mut joined = self.inner.joined.lock().await;
        if let Some(set) = joined.get_mut(&connection_id) {
            set.remove(&conversation_id);
            if set.is_empty() {
                joined.remove(&connection_id);
            }
        }
    }

    /// Unsubscribe a connection from every room it joined. Called by the
    /// registry on disconnect; safe to call for an unknown connection.
    pub async fn leave_all(&self, connection_id: ConnectionId) {
        let conversations = {
            let mut joined = self.inner.joined.lock().await;
            joined.remove(&connection_id).unwrap_or_default()
        };

        for conversation_id in conversations {
            self.remove_from_room(connection_id, conversation_id).await;
        }
    }

    /// Snapshot of the connections currently subscribed to a conversation.
    pub async fn members_of(&self, conversation_id: Uuid) -> Vec<ConnectionId> {
        let room = {
            let rooms = self.inner.rooms.read().await;
            rooms.get(&conversation_id).cloned()
        };
        match room {
            Some(room) => room.read().await.iter().copied().collect(),
            None => Vec::new(),
        }
    }

    pub async fn is_joined(&self, connection_id: ConnectionId, conversation_id: Uuid) -> bool {
        let joined = self.inner.joined.lock().await;
        joined
            .get(&connection_id)
            .map(|set| set.contains(&conversation_id))
            .unwrap_or(false)
    }

    async fn remove_from_room(&self, connection_id: ConnectionId, conversation_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        let emptied = match rooms.get(&conversation_id) {
            Some(room) => {
                let mut set = room.write().await;
                set.remove(&connection_id);
                set.is_empty()
            }
            None => false,
        };
        // Drop empty rooms so the index does not grow without bound.
        if emptied {
            rooms.remove(&conversation_id);
        }
    }
}
