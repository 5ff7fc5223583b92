//! Cross-instance fan-out over redis pub/sub.
//!
//! Room indices are process-local, so every broadcast is also published to
//! a per-conversation redis channel. Peer instances replay the event to
//! their own local room members. Frames carry the origin instance id so an
//! instance never re-delivers its own publications.

use futures_util::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::pipeline;
use super::pipeline::Exclude;
use super::registry::ConnectionRegistry;
use super::rooms::RoomMultiplexer;

fn channel_for_conversation(id: Uuid) -> String {
    format!("conversation:{id}")
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayFrame {
    /// A serialized server event for a conversation's room members.
    Event {
        conversation_id: Uuid,
        /// Identity to skip on the receiving instance, e.g. the user whose
        /// own read receipt is being propagated.
        exclude_user: Option<Uuid>,
        payload: serde_json::Value,
    },
    /// Membership revocation: force-leave every connection of this user.
    Evict {
        conversation_id: Uuid,
        user_id: Uuid,
    },
}

impl RelayFrame {
    fn conversation_id(&self) -> Uuid {
        match self {
            RelayFrame::Event {
                conversation_id, ..
            }
            | RelayFrame::Evict {
                conversation_id, ..
            } => *conversation_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub origin: Uuid,
    #[serde(flatten)]
    pub frame: RelayFrame,
}

/// Publishing half of the relay, held by the pipeline.
#[derive(Clone)]
pub struct RelayPublisher {
    client: redis::Client,
    instance_id: Uuid,
}

impl RelayPublisher {
    pub fn new(client: redis::Client, instance_id: Uuid) -> Self {
        Self {
            client,
            instance_id,
        }
    }

    pub async fn publish(&self, frame: RelayFrame) -> redis::RedisResult<()> {
        let channel = channel_for_conversation(frame.conversation_id());
        let envelope = RelayEnvelope {
            origin: self.instance_id,
            frame,
        };
        let payload = serde_json::to_string(&envelope).map_err(|e| {
            redis::RedisError::from((
                redis::ErrorKind::TypeError,
                "serialize relay frame",
                e.to_string(),
            ))
        })?;

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.publish::<_, _, ()>(channel, payload).await
    }
}

/// Listen for frames published by peer instances and replay them locally.
pub async fn start_relay_listener(
    client: redis::Client,
    instance_id: Uuid,
    registry: ConnectionRegistry,
    rooms: RoomMultiplexer,
) -> redis::RedisResult<()> {
    // Pub/sub needs a dedicated connection, not the multiplexed one.
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe("conversation:*").await?;
    let mut stream = pubsub.on_message();

    while let Some(msg) = stream.next().await {
        let payload: String = msg.get_payload()?;
        let envelope: RelayEnvelope = match serde_json::from_str(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping malformed relay frame");
                continue;
            }
        };
        if envelope.origin == instance_id {
            continue;
        }

        match envelope.frame {
            RelayFrame::Event {
                conversation_id,
                exclude_user,
                payload,
            } => {
                let text = payload.to_string();
                let exclude = exclude_user.map(Exclude::User).unwrap_or(Exclude::None);
                pipeline::fan_out(&registry, &rooms, conversation_id, &text, &exclude).await;
            }
            RelayFrame::Evict {
                conversation_id,
                user_id,
            } => {
                pipeline::evict_local(&registry, &rooms, conversation_id, user_id).await;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_frames_round_trip() {
        let envelope = RelayEnvelope {
            origin: Uuid::new_v4(),
            frame: RelayFrame::Event {
                conversation_id: Uuid::new_v4(),
                exclude_user: Some(Uuid::new_v4()),
                payload: serde_json::json!({"type": "message.read"}),
            },
        };

        let text = serde_json::to_string(&envelope).unwrap();
        let parsed: RelayEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.origin, envelope.origin);
        match parsed.frame {
            RelayFrame::Event { payload, .. } => {
                assert_eq!(payload["type"], "message.read");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn evict_frames_carry_user_and_conversation() {
        let conversation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let envelope = RelayEnvelope {
            origin: Uuid::new_v4(),
            frame: RelayFrame::Evict {
                conversation_id,
                user_id,
            },
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["kind"], "evict");
        assert_eq!(value["conversation_id"], conversation_id.to_string());
        assert_eq!(value["user_id"], user_id.to_string());
    }
}
