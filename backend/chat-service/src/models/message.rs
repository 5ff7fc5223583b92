use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Media,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Media => "media",
            MessageType::System => "system",
        }
    }
}

/// Attachment details carried by media messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaMetadata {
    pub url: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<i64>,
    #[serde(default)]
    pub duration_ms: Option<u32>,
}

/// A chat message, immutable once accepted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub message_type: MessageType,
    pub content: String,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
    #[serde(default)]
    pub media: Option<MediaMetadata>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Truncated content used as the push-notification body. Cuts on a char
    /// boundary and appends an ellipsis when shortened.
    pub fn preview(&self, max_chars: usize) -> String {
        if self.content.chars().count() <= max_chars {
            return self.content.clone();
        }
        let cut: String = self.content.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

/// A batch acknowledgement that a user has read a set of messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub message_ids: Vec<Uuid>,
    pub read_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            message_type: MessageType::Text,
            content: content.to_string(),
            reply_to: None,
            media: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn preview_truncates_long_content() {
        let m = message("a very long message body that keeps going");
        assert_eq!(m.preview(10), "a very lon…");
        assert_eq!(m.preview(100), m.content);
    }

    #[test]
    fn preview_respects_multibyte_boundaries() {
        let m = message("दाल चावल और रोटी");
        // Must not panic on a non-ASCII boundary.
        let p = m.preview(5);
        assert!(p.ends_with('…'));
    }
}
