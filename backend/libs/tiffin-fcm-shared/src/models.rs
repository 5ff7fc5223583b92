use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Delivery urgency requested by the caller.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PushPriority {
    #[default]
    Normal,
    High,
}

impl PushPriority {
    /// Android message priority string expected by the FCM v1 API.
    pub fn android_priority(&self) -> &'static str {
        match self {
            PushPriority::Normal => "NORMAL",
            PushPriority::High => "HIGH",
        }
    }

    /// APNs priority header value: 10 = immediate, 5 = power-friendly.
    pub fn apns_priority(&self) -> &'static str {
        match self {
            PushPriority::Normal => "5",
            PushPriority::High => "10",
        }
    }
}

/// One logical notification, independent of delivery channel.
///
/// Callers build an intent once; [`crate::PayloadBuilder`] renders it into
/// the per-platform blocks of an FCM v1 message. Data values are plain
/// strings because that is all the FCM data payload accepts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub priority: PushPriority,
    #[serde(default)]
    pub sound: Option<String>,
    #[serde(default)]
    pub badge: Option<u32>,
    #[serde(default)]
    pub collapse_key: Option<String>,
    #[serde(default)]
    pub ttl_seconds: Option<u32>,
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// Firebase service account key, parsed from the JSON credentials file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    pub private_key_id: String,
    pub private_key: String,
    pub client_email: String,
    pub client_id: String,
    pub auth_uri: String,
    pub token_uri: String,
}

/// Cached OAuth2 access token.
#[derive(Debug, Clone)]
pub struct TokenCache {
    pub access_token: String,
    pub expires_at: i64,
}

/// JWT claims for the Google OAuth2 JWT-bearer grant.
#[derive(Debug, Serialize)]
pub struct OauthClaims {
    pub iss: String,
    pub sub: String,
    pub scope: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Deserialize)]
pub struct GoogleTokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[allow(dead_code)]
    pub token_type: String,
}

// ============================================================================
// FCM v1 wire format
// ============================================================================

/// Top-level request body for `projects/*/messages:send`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FcmSend {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub validate_only: bool,
    pub message: FcmMessage,
}

/// A single FCM message addressed to a token or a topic.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FcmMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub notification: FcmNotification,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android: Option<AndroidConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns: Option<ApnsConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webpush: Option<WebPushConfig>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FcmNotification {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AndroidConfig {
    pub priority: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapse_key: Option<String>,
    /// Seconds with an "s" suffix, e.g. "3600s".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    pub notification: AndroidNotification,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AndroidNotification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApnsConfig {
    pub headers: BTreeMap<String, String>,
    pub payload: ApnsPayload,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApnsPayload {
    pub aps: Aps,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Aps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<u32>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WebPushConfig {
    pub notification: WebPushNotification,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WebPushNotification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(rename = "requireInteraction")]
    pub require_interaction: bool,
}

/// Successful send response: `{"name": "projects/<p>/messages/<id>"}`.
#[derive(Debug, Deserialize)]
pub struct FcmApiResponse {
    pub name: Option<String>,
}

// ============================================================================
// FCM error response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct FcmErrorBody {
    pub error: FcmErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct FcmErrorDetail {
    pub code: Option<u16>,
    pub status: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub details: Vec<FcmErrorItem>,
}

#[derive(Debug, Deserialize)]
pub struct FcmErrorItem {
    #[serde(rename = "errorCode")]
    pub error_code: Option<String>,
}

impl FcmErrorBody {
    /// The FCM-specific error code (e.g. `UNREGISTERED`), if present.
    pub fn fcm_error_code(&self) -> Option<String> {
        self.error
            .details
            .iter()
            .find_map(|d| d.error_code.clone())
            .or_else(|| self.error.status.clone())
    }
}

// ============================================================================
// Topic management (Instance ID batch API)
// ============================================================================

/// Outcome of a batch topic subscribe/unsubscribe call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicBatchResult {
    pub topic: String,
    pub success_count: usize,
    pub failure_count: usize,
    /// Per-token errors, in input order, for the failed entries.
    pub errors: Vec<TokenTopicError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTopicError {
    pub token: String,
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct IidBatchResponse {
    pub results: Vec<IidBatchEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IidBatchEntry {
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_only_is_omitted_when_false() {
        let send = FcmSend {
            validate_only: false,
            message: FcmMessage {
                token: Some("t".into()),
                topic: None,
                notification: FcmNotification {
                    title: "a".into(),
                    body: "b".into(),
                    image: None,
                },
                data: BTreeMap::new(),
                android: None,
                apns: None,
                webpush: None,
            },
        };

        let json = serde_json::to_value(&send).unwrap();
        assert!(json.get("validate_only").is_none());
        assert!(json["message"].get("topic").is_none());
        assert_eq!(json["message"]["token"], "t");
    }

    #[test]
    fn fcm_error_code_prefers_details_over_status() {
        let body: FcmErrorBody = serde_json::from_str(
            r#"{"error":{"code":404,"status":"NOT_FOUND","message":"Requested entity was not found.",
                "details":[{"@type":"type.googleapis.com/google.firebase.fcm.v1.FcmError","errorCode":"UNREGISTERED"}]}}"#,
        )
        .unwrap();

        assert_eq!(body.fcm_error_code().as_deref(), Some("UNREGISTERED"));
    }

    #[test]
    fn fcm_error_code_falls_back_to_status() {
        let body: FcmErrorBody = serde_json::from_str(
            r#"{"error":{"code":503,"status":"UNAVAILABLE","message":"Service unavailable"}}"#,
        )
        .unwrap();

        assert_eq!(body.fcm_error_code().as_deref(), Some("UNAVAILABLE"));
    }
}
