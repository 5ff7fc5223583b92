use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MessageType;

/// Events a client may send over its websocket.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinConversation {
        conversation_id: Uuid,
    },
    LeaveConversation {
        conversation_id: Uuid,
    },
    SendMessage {
        conversation_id: Uuid,
        content: String,
        #[serde(default)]
        message_type: MessageType,
        #[serde(default)]
        media_url: Option<String>,
        #[serde(default)]
        media_thumbnail: Option<String>,
        #[serde(default)]
        media_size: Option<i64>,
        #[serde(default)]
        media_duration: Option<u32>,
        #[serde(default)]
        reply_to: Option<Uuid>,
    },
    Typing {
        conversation_id: Uuid,
        is_typing: bool,
    },
    MarkAsRead {
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
    },
    DeleteMessage {
        message_id: Uuid,
    },
}
