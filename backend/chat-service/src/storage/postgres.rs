//! Postgres-backed store implementations.
//!
//! The schemas (conversations, conversation_members, messages,
//! message_reads, device_tokens) are owned by the wider platform; this crate
//! only reads and writes the columns the realtime core needs.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{DeviceToken, Message, Platform, ReadReceipt};

use super::{DeviceStore, MembershipStore, MessageStore};

#[derive(Clone)]
pub struct PgMembershipStore {
    db: PgPool,
}

impl PgMembershipStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MembershipStore for PgMembershipStore {
    async fn is_member(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM conversation_members WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.is_some())
    }

    async fn participants(&self, conversation_id: Uuid) -> AppResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT user_id FROM conversation_members WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.iter().map(|r| r.get("user_id")).collect())
    }

    async fn is_privileged(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM conversation_members
             WHERE conversation_id = $1 AND user_id = $2 AND role IN ('owner', 'admin')",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.is_some())
    }

    async fn conversation_title(&self, conversation_id: Uuid) -> AppResult<Option<String>> {
        let row = sqlx::query("SELECT title FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .fetch_optional(&self.db)
            .await?;

        Ok(row.and_then(|r| r.get("title")))
    }
}

#[derive(Clone)]
pub struct PgMessageStore {
    db: PgPool,
}

impl PgMessageStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert_message(&self, message: &Message) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO messages
                (id, conversation_id, sender_id, message_type, content, reply_to,
                 media_url, media_thumbnail, media_size_bytes, media_duration_ms, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(message.message_type.as_str())
        .bind(&message.content)
        .bind(message.reply_to)
        .bind(message.media.as_ref().map(|m| m.url.clone()))
        .bind(message.media.as_ref().and_then(|m| m.thumbnail.clone()))
        .bind(message.media.as_ref().and_then(|m| m.size_bytes))
        .bind(message.media.as_ref().and_then(|m| m.duration_ms.map(|d| d as i64)))
        .bind(message.created_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn message_meta(&self, message_id: Uuid) -> AppResult<Option<(Uuid, Uuid)>> {
        let row = sqlx::query(
            "SELECT conversation_id, sender_id FROM messages
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(message_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|r| (r.get("conversation_id"), r.get("sender_id"))))
    }

    async fn mark_deleted(&self, message_id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE messages SET deleted_at = NOW() WHERE id = $1")
            .bind(message_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn record_read(&self, receipt: &ReadReceipt) -> AppResult<()> {
        // Write-once per (user, message); duplicates are expected on
        // reconnect and ignored.
        for message_id in &receipt.message_ids {
            sqlx::query(
                "INSERT INTO message_reads (conversation_id, user_id, message_id, read_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (user_id, message_id) DO NOTHING",
            )
            .bind(receipt.conversation_id)
            .bind(receipt.user_id)
            .bind(message_id)
            .bind(receipt.read_at)
            .execute(&self.db)
            .await?;
        }

        Ok(())
    }
}

#[derive(Clone)]
pub struct PgDeviceStore {
    db: PgPool,
}

impl PgDeviceStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DeviceStore for PgDeviceStore {
    async fn register(&self, device: DeviceToken) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO device_tokens (token, user_id, platform, registered_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (token) DO UPDATE
               SET user_id = EXCLUDED.user_id,
                   platform = EXCLUDED.platform,
                   registered_at = EXCLUDED.registered_at",
        )
        .bind(&device.token)
        .bind(device.user_id)
        .bind(device.platform.as_str())
        .bind(device.registered_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn unregister(&self, token: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM device_tokens WHERE token = $1")
            .bind(token)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn update_owner(&self, token: &str, user_id: Uuid) -> AppResult<()> {
        let result = sqlx::query("UPDATE device_tokens SET user_id = $1 WHERE token = $2")
            .bind(user_id)
            .bind(token)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(crate::error::AppError::NotFound);
        }
        Ok(())
    }

    async fn tokens_for_user(&self, user_id: Uuid) -> AppResult<Vec<DeviceToken>> {
        let rows = sqlx::query(
            "SELECT token, user_id, platform, registered_at
             FROM device_tokens WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .iter()
            .map(|r| DeviceToken {
                token: r.get("token"),
                user_id: r.get("user_id"),
                platform: Platform::parse(r.get::<String, _>("platform").as_str())
                    .unwrap_or(Platform::Android),
                registered_at: r.get("registered_at"),
            })
            .collect())
    }

    async fn owner_of(&self, token: &str) -> AppResult<Option<Uuid>> {
        let row = sqlx::query("SELECT user_id FROM device_tokens WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.db)
            .await?;

        Ok(row.map(|r| r.get("user_id")))
    }

    async fn remove_invalid(&self, token: &str, expected_owner: Option<Uuid>) -> AppResult<bool> {
        // The owner predicate makes the delete last-writer-safe: if the
        // token was re-registered to a new user after the batch was built,
        // no row matches and the new registration survives.
        let result = match expected_owner {
            Some(owner) => {
                sqlx::query("DELETE FROM device_tokens WHERE token = $1 AND user_id = $2")
                    .bind(token)
                    .bind(owner)
                    .execute(&self.db)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM device_tokens WHERE token = $1")
                    .bind(token)
                    .execute(&self.db)
                    .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }
}
