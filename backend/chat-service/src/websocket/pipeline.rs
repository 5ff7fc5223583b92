//! Chat event pipeline: persist, fan out locally, relay to peers, and
//! bridge to push for participants with no live connection.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::ws::Message as WsMessage;
use chrono::Utc;
use tiffin_fcm_shared::{NotificationIntent, PushPriority};
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{MediaMetadata, Message, MessageType, ReadReceipt};
use crate::services::NotificationDispatcher;
use crate::storage::{MembershipStore, MessageStore};

use super::events::ServerEvent;
use super::pubsub::{RelayFrame, RelayPublisher};
use super::registry::{ConnectionId, ConnectionRegistry};
use super::rooms::RoomMultiplexer;

/// Message preview length used for push notification bodies.
const PUSH_PREVIEW_CHARS: usize = 120;

/// Which recipients to skip during fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclude {
    /// Deliver to every room member, the actor included.
    None,
    /// Skip a single connection; the sender's other devices still receive.
    Connection(ConnectionId),
    /// Skip every connection of a user, e.g. the author of a typing event.
    User(Uuid),
}

/// Fields of an inbound `send_message` frame after protocol decoding.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub content: String,
    pub message_type: MessageType,
    pub media_url: Option<String>,
    pub media_thumbnail: Option<String>,
    pub media_size: Option<i64>,
    pub media_duration: Option<u32>,
    pub reply_to: Option<Uuid>,
}

pub struct MessagePipeline {
    registry: ConnectionRegistry,
    rooms: RoomMultiplexer,
    membership: Arc<dyn MembershipStore>,
    messages: Arc<dyn MessageStore>,
    dispatcher: Option<Arc<NotificationDispatcher>>,
    relay: Option<RelayPublisher>,
}

impl MessagePipeline {
    pub fn new(
        registry: ConnectionRegistry,
        rooms: RoomMultiplexer,
        membership: Arc<dyn MembershipStore>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            registry,
            rooms,
            membership,
            messages,
            dispatcher: None,
            relay: None,
        }
    }

    /// Enable the offline push bridge.
    pub fn with_dispatcher(mut self, dispatcher: Arc<NotificationDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Enable cross-instance relay over redis.
    pub fn with_relay(mut self, relay: RelayPublisher) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomMultiplexer {
        &self.rooms
    }

    pub async fn join(
        &self,
        connection_id: ConnectionId,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<()> {
        self.rooms
            .join(self.membership.as_ref(), connection_id, user_id, conversation_id)
            .await
    }

    pub async fn leave(&self, connection_id: ConnectionId, conversation_id: Uuid) {
        self.rooms.leave(connection_id, conversation_id).await;
    }

    /// Persist a new message, then fan it out to the room. The origin
    /// connection is skipped so the sender sees their own optimistic echo,
    /// while their other devices still receive the event. A storage failure
    /// aborts before any broadcast; no recipient ever sees an unpersisted
    /// message.
    pub async fn send(
        &self,
        connection_id: ConnectionId,
        user_id: Uuid,
        conversation_id: Uuid,
        new_message: NewMessage,
    ) -> AppResult<Message> {
        if !self.rooms.is_joined(connection_id, conversation_id).await {
            return Err(AppError::NotAMember);
        }

        let media = new_message.media_url.map(|url| MediaMetadata {
            url,
            thumbnail: new_message.media_thumbnail,
            size_bytes: new_message.media_size,
            duration_ms: new_message.media_duration,
        });
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: user_id,
            message_type: new_message.message_type,
            content: new_message.content,
            reply_to: new_message.reply_to,
            media,
            created_at: Utc::now(),
        };

        self.messages.insert_message(&message).await?;

        self.broadcast(
            conversation_id,
            &ServerEvent::MessageNew {
                message: message.clone(),
            },
            Exclude::Connection(connection_id),
        )
        .await;

        self.notify_offline_participants(&message).await;

        Ok(message)
    }

    /// Ephemeral typing indicator. Never persisted; the author's own
    /// connections are skipped.
    pub async fn set_typing(
        &self,
        connection_id: ConnectionId,
        user_id: Uuid,
        conversation_id: Uuid,
        is_typing: bool,
    ) -> AppResult<()> {
        if !self.rooms.is_joined(connection_id, conversation_id).await {
            return Err(AppError::NotAMember);
        }

        self.broadcast(
            conversation_id,
            &ServerEvent::TypingIndicator {
                conversation_id,
                user_id,
                is_typing,
                timestamp: Utc::now(),
            },
            Exclude::User(user_id),
        )
        .await;
        Ok(())
    }

    /// Record read receipts, then tell everyone but the reader.
    pub async fn mark_read(
        &self,
        connection_id: ConnectionId,
        user_id: Uuid,
        conversation_id: Uuid,
        message_ids: Vec<Uuid>,
    ) -> AppResult<()> {
        if !self.rooms.is_joined(connection_id, conversation_id).await {
            return Err(AppError::NotAMember);
        }
        if message_ids.is_empty() {
            return Err(AppError::BadRequest("message_ids must not be empty".into()));
        }

        let receipt = ReadReceipt {
            conversation_id,
            user_id,
            message_ids: message_ids.clone(),
            read_at: Utc::now(),
        };
        self.messages.record_read(&receipt).await?;

        self.broadcast(
            conversation_id,
            &ServerEvent::MessageRead {
                conversation_id,
                user_id,
                message_ids,
                timestamp: receipt.read_at,
            },
            Exclude::User(user_id),
        )
        .await;
        Ok(())
    }

    /// Soft-delete a message. Allowed for the author and for privileged
    /// conversation members. The tombstone event goes to the message's own
    /// room only, every member included.
    pub async fn delete_message(
        &self,
        user_id: Uuid,
        message_id: Uuid,
    ) -> AppResult<()> {
        let Some((conversation_id, sender_id)) = self.messages.message_meta(message_id).await?
        else {
            return Err(AppError::NotFound);
        };

        let authorized = user_id == sender_id
            || self.membership.is_privileged(conversation_id, user_id).await?;
        if !authorized {
            return Err(AppError::Forbidden);
        }

        self.messages.mark_deleted(message_id).await?;

        self.broadcast(
            conversation_id,
            &ServerEvent::MessageDeleted {
                conversation_id,
                message_id,
                user_id,
                timestamp: Utc::now(),
            },
            Exclude::None,
        )
        .await;
        Ok(())
    }

    /// Force-leave every connection of a user whose membership was revoked,
    /// on this instance and on peers.
    pub async fn evict(&self, conversation_id: Uuid, user_id: Uuid) {
        evict_local(&self.registry, &self.rooms, conversation_id, user_id).await;

        if let Some(relay) = &self.relay {
            let frame = RelayFrame::Evict {
                conversation_id,
                user_id,
            };
            if let Err(e) = relay.publish(frame).await {
                warn!(error = %e, %conversation_id, %user_id, "failed to relay eviction");
            }
        }
    }

    async fn broadcast(&self, conversation_id: Uuid, event: &ServerEvent, exclude: Exclude) {
        let payload = match event.to_payload_value() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, event = event.event_type(), "failed to serialize event");
                return;
            }
        };
        let text = payload.to_string();

        fan_out(&self.registry, &self.rooms, conversation_id, &text, &exclude).await;

        if let Some(relay) = &self.relay {
            let exclude_user = match exclude {
                Exclude::User(user_id) => Some(user_id),
                _ => None,
            };
            let frame = RelayFrame::Event {
                conversation_id,
                exclude_user,
                payload,
            };
            if let Err(e) = relay.publish(frame).await {
                warn!(error = %e, %conversation_id, "failed to relay event");
            }
        }
    }

    /// Push bridge: participants with zero live connections on this
    /// instance get the message as a push notification instead. Push
    /// failures are logged, never surfaced to the sender.
    async fn notify_offline_participants(&self, message: &Message) {
        let Some(dispatcher) = &self.dispatcher else {
            return;
        };

        let participants = match self.membership.participants(message.conversation_id).await {
            Ok(participants) => participants,
            Err(e) => {
                warn!(error = %e, "could not load participants for push bridge");
                return;
            }
        };

        let mut offline = Vec::new();
        for participant in participants {
            if participant == message.sender_id {
                continue;
            }
            if self.registry.connections_for(participant).await.is_empty() {
                offline.push(participant);
            }
        }
        if offline.is_empty() {
            return;
        }

        let title = match self.membership.conversation_title(message.conversation_id).await {
            Ok(Some(title)) => title,
            Ok(None) => "New message".to_string(),
            Err(e) => {
                warn!(error = %e, "could not load conversation title, using fallback");
                "New message".to_string()
            }
        };

        let mut data = BTreeMap::new();
        data.insert(
            "conversation_id".to_string(),
            message.conversation_id.to_string(),
        );
        data.insert("message_id".to_string(), message.id.to_string());
        data.insert("sender_id".to_string(), message.sender_id.to_string());

        let intent = NotificationIntent {
            title,
            body: message.preview(PUSH_PREVIEW_CHARS),
            data,
            priority: PushPriority::High,
            collapse_key: Some(format!("conversation-{}", message.conversation_id)),
            channel_id: Some("messages".to_string()),
            ..Default::default()
        };

        for user_id in offline {
            if let Err(e) = dispatcher.send_to_user(user_id, &intent).await {
                warn!(error = %e, %user_id, "push bridge delivery failed");
            }
        }
    }
}

/// Deliver one serialized event to the room's local members, honoring the
/// exclusion. Shared with the relay listener, which replays peer events.
pub(crate) async fn fan_out(
    registry: &ConnectionRegistry,
    rooms: &RoomMultiplexer,
    conversation_id: Uuid,
    text: &str,
    exclude: &Exclude,
) {
    for connection_id in rooms.members_of(conversation_id).await {
        let skip = match exclude {
            Exclude::None => false,
            Exclude::Connection(excluded) => *excluded == connection_id,
            Exclude::User(user_id) => registry.lookup(connection_id).await == Some(*user_id),
        };
        if skip {
            continue;
        }
        registry
            .send_to(connection_id, WsMessage::Text(text.to_string().into()))
            .await;
    }
}

/// Remove a user's local connections from a room and tell each of them.
pub(crate) async fn evict_local(
    registry: &ConnectionRegistry,
    rooms: &RoomMultiplexer,
    conversation_id: Uuid,
    user_id: Uuid,
) {
    for connection_id in registry.connections_for(user_id).await {
        if !rooms.is_joined(connection_id, conversation_id).await {
            continue;
        }
        rooms.leave(connection_id, conversation_id).await;
        if let Ok(notice) = (ServerEvent::MemberEvicted { conversation_id }).to_ws_message() {
            registry.send_to(connection_id, notice).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::storage::memory::{MemoryMembershipStore, MemoryMessageStore};

    struct Fixture {
        pipeline: MessagePipeline,
        membership: Arc<MemoryMembershipStore>,
        messages: Arc<MemoryMessageStore>,
    }

    fn fixture() -> Fixture {
        let membership = Arc::new(MemoryMembershipStore::default());
        let messages = Arc::new(MemoryMessageStore::default());
        let pipeline = MessagePipeline::new(
            ConnectionRegistry::new(),
            RoomMultiplexer::new(),
            membership.clone(),
            messages.clone(),
        );
        Fixture {
            pipeline,
            membership,
            messages,
        }
    }

    async fn connect(
        fixture: &Fixture,
        user_id: Uuid,
    ) -> (ConnectionId, UnboundedReceiver<WsMessage>) {
        let connection_id = Uuid::new_v4();
        let rx = fixture.pipeline.registry().register(connection_id, user_id).await;
        (connection_id, rx)
    }

    fn next_event(rx: &mut UnboundedReceiver<WsMessage>) -> serde_json::Value {
        match rx.try_recv().expect("expected a frame") {
            WsMessage::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn message_reaches_room_but_not_origin_connection() {
        let fixture = fixture();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        fixture.membership.add_conversation(conversation, None, &[alice, bob]);

        let (alice_phone, mut alice_phone_rx) = connect(&fixture, alice).await;
        let (alice_laptop, mut alice_laptop_rx) = connect(&fixture, alice).await;
        let (bob_conn, mut bob_rx) = connect(&fixture, bob).await;
        for (conn, user) in [(alice_phone, alice), (alice_laptop, alice), (bob_conn, bob)] {
            fixture.pipeline.join(conn, user, conversation).await.unwrap();
        }

        let sent = fixture
            .pipeline
            .send(
                alice_phone,
                alice,
                conversation,
                NewMessage {
                    content: "lunch is out for delivery".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Origin connection gets nothing; the sender's other device and the
        // other participant both do.
        assert!(alice_phone_rx.try_recv().is_err());
        let laptop_event = next_event(&mut alice_laptop_rx);
        let bob_event = next_event(&mut bob_rx);
        assert_eq!(laptop_event["type"], "message.new");
        assert_eq!(bob_event["message"]["id"], sent.id.to_string());
        assert_eq!(fixture.messages.stored_count(), 1);
    }

    #[tokio::test]
    async fn send_without_join_is_rejected() {
        let fixture = fixture();
        let alice = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        fixture.membership.add_conversation(conversation, None, &[alice]);
        let (conn, _rx) = connect(&fixture, alice).await;

        let err = fixture
            .pipeline
            .send(conn, alice, conversation, NewMessage::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotAMember));
        assert_eq!(fixture.messages.stored_count(), 0);
    }

    #[tokio::test]
    async fn storage_failure_aborts_before_broadcast() {
        let fixture = fixture();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        fixture.membership.add_conversation(conversation, None, &[alice, bob]);

        let (alice_conn, _alice_rx) = connect(&fixture, alice).await;
        let (bob_conn, mut bob_rx) = connect(&fixture, bob).await;
        fixture.pipeline.join(alice_conn, alice, conversation).await.unwrap();
        fixture.pipeline.join(bob_conn, bob, conversation).await.unwrap();

        fixture.messages.fail_writes(true);
        let err = fixture
            .pipeline
            .send(
                alice_conn,
                alice,
                conversation,
                NewMessage {
                    content: "lost".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Persistence(_)));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn typing_skips_every_connection_of_the_author() {
        let fixture = fixture();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        fixture.membership.add_conversation(conversation, None, &[alice, bob]);

        let (alice_phone, mut alice_phone_rx) = connect(&fixture, alice).await;
        let (alice_laptop, mut alice_laptop_rx) = connect(&fixture, alice).await;
        let (bob_conn, mut bob_rx) = connect(&fixture, bob).await;
        for (conn, user) in [(alice_phone, alice), (alice_laptop, alice), (bob_conn, bob)] {
            fixture.pipeline.join(conn, user, conversation).await.unwrap();
        }

        fixture
            .pipeline
            .set_typing(alice_phone, alice, conversation, true)
            .await
            .unwrap();

        assert!(alice_phone_rx.try_recv().is_err());
        assert!(alice_laptop_rx.try_recv().is_err());
        let event = next_event(&mut bob_rx);
        assert_eq!(event["type"], "typing.indicator");
        assert_eq!(event["is_typing"], true);
    }

    #[tokio::test]
    async fn read_receipts_are_persisted_and_exclude_the_reader() {
        let fixture = fixture();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        fixture.membership.add_conversation(conversation, None, &[alice, bob]);

        let (alice_conn, mut alice_rx) = connect(&fixture, alice).await;
        let (bob_conn, mut bob_rx) = connect(&fixture, bob).await;
        fixture.pipeline.join(alice_conn, alice, conversation).await.unwrap();
        fixture.pipeline.join(bob_conn, bob, conversation).await.unwrap();

        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        fixture
            .pipeline
            .mark_read(bob_conn, bob, conversation, ids.clone())
            .await
            .unwrap();

        assert!(bob_rx.try_recv().is_err());
        let event = next_event(&mut alice_rx);
        assert_eq!(event["type"], "message.read");
        assert_eq!(event["message_ids"].as_array().unwrap().len(), 2);
        assert_eq!(fixture.messages.receipts().len(), 1);
    }

    #[tokio::test]
    async fn deletion_requires_author_or_privilege() {
        let fixture = fixture();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        fixture
            .membership
            .add_conversation(conversation, None, &[alice, bob, admin]);
        fixture.membership.grant_privilege(conversation, admin);

        let (alice_conn, _alice_rx) = connect(&fixture, alice).await;
        fixture.pipeline.join(alice_conn, alice, conversation).await.unwrap();
        let message = fixture
            .pipeline
            .send(
                alice_conn,
                alice,
                conversation,
                NewMessage {
                    content: "oops".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = fixture
            .pipeline
            .delete_message(bob, message.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
        assert!(!fixture.messages.is_deleted(message.id));

        fixture.pipeline.delete_message(admin, message.id).await.unwrap();
        assert!(fixture.messages.is_deleted(message.id));
    }

    #[tokio::test]
    async fn deletion_tombstone_reaches_the_whole_room() {
        let fixture = fixture();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        fixture.membership.add_conversation(conversation, None, &[alice, bob]);

        let (alice_conn, mut alice_rx) = connect(&fixture, alice).await;
        let (bob_conn, mut bob_rx) = connect(&fixture, bob).await;
        fixture.pipeline.join(alice_conn, alice, conversation).await.unwrap();
        fixture.pipeline.join(bob_conn, bob, conversation).await.unwrap();

        let message = fixture
            .pipeline
            .send(
                alice_conn,
                alice,
                conversation,
                NewMessage {
                    content: "wrong chat".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let _ = bob_rx.try_recv();

        fixture.pipeline.delete_message(alice, message.id).await.unwrap();

        // Every room member sees the tombstone, the deleter included.
        let alice_event = next_event(&mut alice_rx);
        let bob_event = next_event(&mut bob_rx);
        assert_eq!(alice_event["type"], "message.deleted");
        assert_eq!(bob_event["message_id"], message.id.to_string());
    }

    #[tokio::test]
    async fn deleting_unknown_message_is_not_found() {
        let fixture = fixture();
        let err = fixture
            .pipeline
            .delete_message(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn disconnect_cleans_room_membership_and_later_sends_skip_the_peer() {
        let fixture = fixture();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        fixture.membership.add_conversation(conversation, None, &[alice, bob]);

        let (alice_phone, _alice_phone_rx) = connect(&fixture, alice).await;
        let (alice_laptop, mut alice_laptop_rx) = connect(&fixture, alice).await;
        let (bob_conn, mut bob_rx) = connect(&fixture, bob).await;
        for (conn, user) in [(alice_phone, alice), (alice_laptop, alice), (bob_conn, bob)] {
            fixture.pipeline.join(conn, user, conversation).await.unwrap();
        }

        // Transport close: the registry removal cascades through the rooms.
        fixture
            .pipeline
            .registry()
            .remove(bob_conn, fixture.pipeline.rooms())
            .await;

        let mut members = fixture.pipeline.rooms().members_of(conversation).await;
        members.sort();
        let mut expected = vec![alice_phone, alice_laptop];
        expected.sort();
        assert_eq!(members, expected);

        let sent = fixture
            .pipeline
            .send(
                alice_phone,
                alice,
                conversation,
                NewMessage {
                    content: "anyone still here?".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Fan-out still reaches the remaining members and queues nothing
        // for the departed connection.
        assert_eq!(
            next_event(&mut alice_laptop_rx)["message"]["id"],
            sent.id.to_string()
        );
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn eviction_removes_every_connection_and_notifies_them() {
        let fixture = fixture();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        fixture.membership.add_conversation(conversation, None, &[alice, bob]);

        let (bob_phone, mut bob_phone_rx) = connect(&fixture, bob).await;
        let (bob_web, mut bob_web_rx) = connect(&fixture, bob).await;
        fixture.pipeline.join(bob_phone, bob, conversation).await.unwrap();
        fixture.pipeline.join(bob_web, bob, conversation).await.unwrap();

        fixture.membership.revoke_member(conversation, bob);
        fixture.pipeline.evict(conversation, bob).await;

        assert!(!fixture.pipeline.rooms().is_joined(bob_phone, conversation).await);
        assert!(!fixture.pipeline.rooms().is_joined(bob_web, conversation).await);
        assert_eq!(next_event(&mut bob_phone_rx)["type"], "member.evicted");
        assert_eq!(next_event(&mut bob_web_rx)["type"], "member.evicted");

        // And the revoked user cannot rejoin.
        let err = fixture
            .pipeline
            .join(bob_phone, bob, conversation)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotAMember));
    }
}
