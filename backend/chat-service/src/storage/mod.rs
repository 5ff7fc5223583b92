//! External collaborators behind traits.
//!
//! Conversation membership, message persistence and device-token storage are
//! owned by other parts of the platform; the realtime core only talks to
//! them through these traits. Production wires in the Postgres
//! implementations, tests wire in the in-memory ones.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{DeviceToken, Message, ReadReceipt};

/// Who is currently allowed in a conversation.
///
/// Looked up fresh on every join so revoked participants cannot re-enter a
/// room on the strength of stale state.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn is_member(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool>;

    /// All current participants of the conversation.
    async fn participants(&self, conversation_id: Uuid) -> AppResult<Vec<Uuid>>;

    /// Whether the user holds a privileged role (owner/admin) in the
    /// conversation; used to authorize deleting someone else's message.
    async fn is_privileged(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool>;

    /// Display title for the conversation, if it has one.
    async fn conversation_title(&self, conversation_id: Uuid) -> AppResult<Option<String>>;
}

/// Durable message and read-receipt storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, message: &Message) -> AppResult<()>;

    /// Conversation and sender of a stored message, if it exists.
    async fn message_meta(&self, message_id: Uuid) -> AppResult<Option<(Uuid, Uuid)>>;

    async fn mark_deleted(&self, message_id: Uuid) -> AppResult<()>;

    async fn record_read(&self, receipt: &ReadReceipt) -> AppResult<()>;
}

/// Device-token registry.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Register a token, reassigning it if the value already exists.
    async fn register(&self, device: DeviceToken) -> AppResult<()>;

    async fn unregister(&self, token: &str) -> AppResult<()>;

    /// Hand a device over to a different user.
    async fn update_owner(&self, token: &str, user_id: Uuid) -> AppResult<()>;

    async fn tokens_for_user(&self, user_id: Uuid) -> AppResult<Vec<DeviceToken>>;

    /// Current owner of a token value, if registered.
    async fn owner_of(&self, token: &str) -> AppResult<Option<Uuid>>;

    /// Remove a token the provider declared permanently invalid.
    ///
    /// The expected owner is the one observed when the delivery batch was
    /// built; if the token has since been re-registered to someone else the
    /// removal is skipped so the new owner keeps receiving pushes. Returns
    /// whether a row was removed.
    async fn remove_invalid(&self, token: &str, expected_owner: Option<Uuid>) -> AppResult<bool>;
}
