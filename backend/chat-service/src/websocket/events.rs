//! Outbound websocket events.
//!
//! All events share one flat JSON structure: a `type` discriminator in
//! "object.action" form plus the event's own fields. Serialization lives
//! here; handlers never hand-build event JSON.

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::Message as ChatMessage;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// A new message was accepted into the conversation.
    #[serde(rename = "message.new")]
    MessageNew { message: ChatMessage },

    /// Someone started or stopped typing. Timestamped so receivers can
    /// resolve out-of-order arrival themselves; the pipeline does not order
    /// these.
    #[serde(rename = "typing.indicator")]
    TypingIndicator {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
        timestamp: DateTime<Utc>,
    },

    /// A user acknowledged a batch of messages.
    #[serde(rename = "message.read")]
    MessageRead {
        conversation_id: Uuid,
        user_id: Uuid,
        message_ids: Vec<Uuid>,
        timestamp: DateTime<Utc>,
    },

    /// A message was deleted.
    #[serde(rename = "message.deleted")]
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// The receiving connection was removed from a conversation.
    #[serde(rename = "member.evicted")]
    MemberEvicted { conversation_id: Uuid },

    /// Reported only to the connection whose request failed.
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageNew { .. } => "message.new",
            Self::TypingIndicator { .. } => "typing.indicator",
            Self::MessageRead { .. } => "message.read",
            Self::MessageDeleted { .. } => "message.deleted",
            Self::MemberEvicted { .. } => "member.evicted",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_payload_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn to_ws_message(&self) -> Result<Message, serde_json::Error> {
        let text = serde_json::to_string(self)?;
        Ok(Message::Text(text.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_flat_with_a_type_tag() {
        let conversation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let event = ServerEvent::TypingIndicator {
            conversation_id,
            user_id,
            is_typing: true,
            timestamp: Utc::now(),
        };

        let value = event.to_payload_value().unwrap();
        assert_eq!(value["type"], "typing.indicator");
        assert_eq!(value["conversation_id"], conversation_id.to_string());
        assert_eq!(value["user_id"], user_id.to_string());
        assert_eq!(value["is_typing"], true);
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn read_event_carries_the_acknowledged_ids() {
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        let event = ServerEvent::MessageRead {
            conversation_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            message_ids: ids.clone(),
            timestamp: Utc::now(),
        };

        let value = event.to_payload_value().unwrap();
        assert_eq!(value["type"], "message.read");
        assert_eq!(value["message_ids"].as_array().unwrap().len(), ids.len());
    }

    #[test]
    fn event_type_matches_serialized_tag() {
        let event = ServerEvent::Error {
            message: "nope".into(),
        };
        let value = event.to_payload_value().unwrap();
        assert_eq!(value["type"], event.event_type());
    }
}
