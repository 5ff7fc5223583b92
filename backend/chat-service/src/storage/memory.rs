//! In-memory store implementations.
//!
//! Used by unit and integration tests, and handy for local development
//! without a database. Behavior mirrors the Postgres implementations,
//! including the owner check on invalid-token cleanup.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{DeviceToken, Message, ReadReceipt};

use super::{DeviceStore, MembershipStore, MessageStore};

#[derive(Default)]
struct ConversationRecord {
    title: Option<String>,
    members: HashSet<Uuid>,
    privileged: HashSet<Uuid>,
}

/// In-memory conversation membership.
#[derive(Default)]
pub struct MemoryMembershipStore {
    conversations: Mutex<HashMap<Uuid, ConversationRecord>>,
}

impl MemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_conversation(&self, conversation_id: Uuid, title: Option<&str>, members: &[Uuid]) {
        let mut guard = self.conversations.lock().unwrap();
        let record = guard.entry(conversation_id).or_default();
        record.title = title.map(String::from);
        record.members.extend(members.iter().copied());
    }

    pub fn grant_privilege(&self, conversation_id: Uuid, user_id: Uuid) {
        let mut guard = self.conversations.lock().unwrap();
        guard
            .entry(conversation_id)
            .or_default()
            .privileged
            .insert(user_id);
    }

    pub fn revoke_member(&self, conversation_id: Uuid, user_id: Uuid) {
        let mut guard = self.conversations.lock().unwrap();
        if let Some(record) = guard.get_mut(&conversation_id) {
            record.members.remove(&user_id);
            record.privileged.remove(&user_id);
        }
    }
}

#[async_trait]
impl MembershipStore for MemoryMembershipStore {
    async fn is_member(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let guard = self.conversations.lock().unwrap();
        Ok(guard
            .get(&conversation_id)
            .map(|r| r.members.contains(&user_id))
            .unwrap_or(false))
    }

    async fn participants(&self, conversation_id: Uuid) -> AppResult<Vec<Uuid>> {
        let guard = self.conversations.lock().unwrap();
        Ok(guard
            .get(&conversation_id)
            .map(|r| r.members.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn is_privileged(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let guard = self.conversations.lock().unwrap();
        Ok(guard
            .get(&conversation_id)
            .map(|r| r.privileged.contains(&user_id))
            .unwrap_or(false))
    }

    async fn conversation_title(&self, conversation_id: Uuid) -> AppResult<Option<String>> {
        let guard = self.conversations.lock().unwrap();
        Ok(guard
            .get(&conversation_id)
            .and_then(|r| r.title.clone()))
    }
}

/// In-memory message store with a switch to simulate a store outage.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: Mutex<HashMap<Uuid, Message>>,
    deleted: Mutex<HashSet<Uuid>>,
    receipts: Mutex<Vec<ReadReceipt>>,
    fail_writes: AtomicBool,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, as if the durable store went away.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn stored_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn is_deleted(&self, message_id: Uuid) -> bool {
        self.deleted.lock().unwrap().contains(&message_id)
    }

    pub fn receipts(&self) -> Vec<ReadReceipt> {
        self.receipts.lock().unwrap().clone()
    }

    fn check_writable(&self) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(AppError::Persistence("message store unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert_message(&self, message: &Message) -> AppResult<()> {
        self.check_writable()?;
        self.messages
            .lock()
            .unwrap()
            .insert(message.id, message.clone());
        Ok(())
    }

    async fn message_meta(&self, message_id: Uuid) -> AppResult<Option<(Uuid, Uuid)>> {
        let guard = self.messages.lock().unwrap();
        Ok(guard
            .get(&message_id)
            .map(|m| (m.conversation_id, m.sender_id)))
    }

    async fn mark_deleted(&self, message_id: Uuid) -> AppResult<()> {
        self.check_writable()?;
        self.deleted.lock().unwrap().insert(message_id);
        Ok(())
    }

    async fn record_read(&self, receipt: &ReadReceipt) -> AppResult<()> {
        self.check_writable()?;
        self.receipts.lock().unwrap().push(receipt.clone());
        Ok(())
    }
}

/// In-memory device-token registry.
#[derive(Default)]
pub struct MemoryDeviceStore {
    tokens: Mutex<HashMap<String, DeviceToken>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.lock().unwrap().contains_key(token)
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn register(&self, device: DeviceToken) -> AppResult<()> {
        self.tokens
            .lock()
            .unwrap()
            .insert(device.token.clone(), device);
        Ok(())
    }

    async fn unregister(&self, token: &str) -> AppResult<()> {
        self.tokens.lock().unwrap().remove(token);
        Ok(())
    }

    async fn update_owner(&self, token: &str, user_id: Uuid) -> AppResult<()> {
        let mut guard = self.tokens.lock().unwrap();
        match guard.get_mut(token) {
            Some(device) => {
                device.user_id = user_id;
                Ok(())
            }
            None => Err(AppError::NotFound),
        }
    }

    async fn tokens_for_user(&self, user_id: Uuid) -> AppResult<Vec<DeviceToken>> {
        let guard = self.tokens.lock().unwrap();
        Ok(guard
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn owner_of(&self, token: &str) -> AppResult<Option<Uuid>> {
        let guard = self.tokens.lock().unwrap();
        Ok(guard.get(token).map(|d| d.user_id))
    }

    async fn remove_invalid(&self, token: &str, expected_owner: Option<Uuid>) -> AppResult<bool> {
        let mut guard = self.tokens.lock().unwrap();
        match guard.get(token) {
            Some(device) => {
                if let Some(owner) = expected_owner {
                    if device.user_id != owner {
                        // Token was handed to a new owner since the batch was
                        // built; leave it alone.
                        return Ok(false);
                    }
                }
                guard.remove(token);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;
    use chrono::Utc;

    fn device(token: &str, user: Uuid) -> DeviceToken {
        DeviceToken {
            token: token.to_string(),
            user_id: user,
            platform: Platform::Android,
            registered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn cleanup_skips_reassigned_tokens() {
        let store = MemoryDeviceStore::new();
        let old_owner = Uuid::new_v4();
        let new_owner = Uuid::new_v4();

        store.register(device("tok", old_owner)).await.unwrap();
        store.update_owner("tok", new_owner).await.unwrap();

        // Cleanup keyed to the old owner must be a no-op.
        assert!(!store.remove_invalid("tok", Some(old_owner)).await.unwrap());
        assert!(store.contains("tok"));

        assert!(store.remove_invalid("tok", Some(new_owner)).await.unwrap());
        assert!(!store.contains("tok"));
    }

    #[tokio::test]
    async fn tokens_for_user_supports_multi_device() {
        let store = MemoryDeviceStore::new();
        let user = Uuid::new_v4();

        store.register(device("phone", user)).await.unwrap();
        store.register(device("tablet", user)).await.unwrap();
        store
            .register(device("other", Uuid::new_v4()))
            .await
            .unwrap();

        let tokens = store.tokens_for_user(user).await.unwrap();
        assert_eq!(tokens.len(), 2);
    }

    #[tokio::test]
    async fn failed_writes_surface_persistence_errors() {
        let store = MemoryMessageStore::new();
        store.fail_writes(true);

        let receipt = ReadReceipt {
            conversation_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            message_ids: vec![Uuid::new_v4()],
            read_at: Utc::now(),
        };

        assert!(matches!(
            store.record_read(&receipt).await,
            Err(AppError::Persistence(_))
        ));
    }
}
