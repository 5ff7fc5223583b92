//! Channel-aware payload construction.
//!
//! One [`NotificationIntent`] is rendered deterministically into the generic
//! notification block plus Android, APNs and WebPush blocks of a single FCM
//! v1 message. Callers never hand-construct platform payloads.

use crate::models::{
    AndroidConfig, AndroidNotification, Aps, ApnsConfig, ApnsPayload, FcmMessage, FcmNotification,
    FcmSend, NotificationIntent, WebPushConfig, WebPushNotification,
};
use std::collections::BTreeMap;

/// Stateless builder turning intents into FCM wire messages.
pub struct PayloadBuilder;

impl PayloadBuilder {
    /// Render an intent addressed to a single device token.
    pub fn for_token(intent: &NotificationIntent, token: &str) -> FcmSend {
        let mut message = Self::build(intent);
        message.token = Some(token.to_string());
        FcmSend {
            validate_only: false,
            message,
        }
    }

    /// Render an intent addressed to a topic; the provider fans out.
    pub fn for_topic(intent: &NotificationIntent, topic: &str) -> FcmSend {
        let mut message = Self::build(intent);
        message.topic = Some(topic.to_string());
        FcmSend {
            validate_only: false,
            message,
        }
    }

    /// Render a non-delivering probe used to check whether a token is live.
    pub fn probe(token: &str) -> FcmSend {
        let intent = NotificationIntent {
            title: "probe".to_string(),
            body: String::new(),
            ..Default::default()
        };
        let mut send = Self::for_token(&intent, token);
        send.validate_only = true;
        send
    }

    fn build(intent: &NotificationIntent) -> FcmMessage {
        FcmMessage {
            token: None,
            topic: None,
            notification: FcmNotification {
                title: intent.title.clone(),
                body: intent.body.clone(),
                image: intent.image_url.clone(),
            },
            data: intent.data.clone(),
            android: Some(Self::android(intent)),
            apns: Some(Self::apns(intent)),
            webpush: Some(Self::webpush(intent)),
        }
    }

    fn android(intent: &NotificationIntent) -> AndroidConfig {
        AndroidConfig {
            priority: intent.priority.android_priority().to_string(),
            collapse_key: intent.collapse_key.clone(),
            ttl: intent.ttl_seconds.map(|s| format!("{s}s")),
            notification: AndroidNotification {
                sound: intent.sound.clone(),
                channel_id: intent.channel_id.clone(),
                image: intent.image_url.clone(),
            },
        }
    }

    fn apns(intent: &NotificationIntent) -> ApnsConfig {
        let mut headers = BTreeMap::new();
        headers.insert(
            "apns-priority".to_string(),
            intent.priority.apns_priority().to_string(),
        );
        if let Some(collapse) = &intent.collapse_key {
            headers.insert("apns-collapse-id".to_string(), collapse.clone());
        }

        ApnsConfig {
            headers,
            payload: ApnsPayload {
                aps: Aps {
                    sound: intent.sound.clone(),
                    badge: intent.badge,
                },
            },
        }
    }

    fn webpush(intent: &NotificationIntent) -> WebPushConfig {
        WebPushConfig {
            notification: WebPushNotification {
                icon: intent.image_url.clone(),
                // High-priority pushes should stay on screen until the user
                // interacts with them.
                require_interaction: intent.priority == crate::models::PushPriority::High,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PushPriority;

    fn intent() -> NotificationIntent {
        let mut data = BTreeMap::new();
        data.insert("conversation_id".to_string(), "c-1".to_string());
        data.insert("message_id".to_string(), "m-1".to_string());

        NotificationIntent {
            title: "Asha's Kitchen".to_string(),
            body: "Your lunch is on the way".to_string(),
            data,
            image_url: Some("https://cdn.tiffin.app/box.png".to_string()),
            priority: PushPriority::High,
            sound: Some("ding".to_string()),
            badge: Some(3),
            collapse_key: Some("conv-c-1".to_string()),
            ttl_seconds: Some(3600),
            channel_id: Some("messages".to_string()),
        }
    }

    #[test]
    fn renders_all_three_channel_blocks() {
        let send = PayloadBuilder::for_token(&intent(), "tok-1");
        let msg = &send.message;

        assert_eq!(msg.token.as_deref(), Some("tok-1"));
        assert!(msg.topic.is_none());

        let android = msg.android.as_ref().unwrap();
        assert_eq!(android.priority, "HIGH");
        assert_eq!(android.ttl.as_deref(), Some("3600s"));
        assert_eq!(android.collapse_key.as_deref(), Some("conv-c-1"));
        assert_eq!(android.notification.channel_id.as_deref(), Some("messages"));

        let apns = msg.apns.as_ref().unwrap();
        assert_eq!(apns.headers.get("apns-priority").unwrap(), "10");
        assert_eq!(apns.headers.get("apns-collapse-id").unwrap(), "conv-c-1");
        assert_eq!(apns.payload.aps.badge, Some(3));

        let webpush = msg.webpush.as_ref().unwrap();
        assert!(webpush.notification.require_interaction);
        assert_eq!(
            webpush.notification.icon.as_deref(),
            Some("https://cdn.tiffin.app/box.png")
        );
    }

    #[test]
    fn construction_is_deterministic() {
        let a = PayloadBuilder::for_token(&intent(), "tok-1");
        let b = PayloadBuilder::for_token(&intent(), "tok-1");
        assert_eq!(a, b);

        let json_a = serde_json::to_string(&a).unwrap();
        let json_b = serde_json::to_string(&b).unwrap();
        assert_eq!(json_a, json_b);
    }

    #[test]
    fn topic_addressing_excludes_token() {
        let send = PayloadBuilder::for_topic(&intent(), "promotions");
        assert_eq!(send.message.topic.as_deref(), Some("promotions"));
        assert!(send.message.token.is_none());
    }

    #[test]
    fn probe_is_validate_only() {
        let send = PayloadBuilder::probe("tok-1");
        assert!(send.validate_only);
        assert_eq!(send.message.token.as_deref(), Some("tok-1"));
    }

    #[test]
    fn normal_priority_maps_to_power_friendly_values() {
        let mut i = intent();
        i.priority = PushPriority::Normal;
        let send = PayloadBuilder::for_token(&i, "tok-1");

        assert_eq!(send.message.android.as_ref().unwrap().priority, "NORMAL");
        assert_eq!(
            send.message
                .apns
                .as_ref()
                .unwrap()
                .headers
                .get("apns-priority")
                .unwrap(),
            "5"
        );
        assert!(!send.message.webpush.as_ref().unwrap().notification.require_interaction);
    }
}
