use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::classify::{classify, DeliveryFailure};
use crate::errors::FcmError;
use crate::models::*;
use crate::payload::PayloadBuilder;

const OAUTH_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const DEFAULT_API_BASE: &str = "https://fcm.googleapis.com";
const DEFAULT_IID_BASE: &str = "https://iid.googleapis.com";

/// Abstraction over the push provider.
///
/// The dispatcher and topic manager depend on this trait; production wires in
/// [`FcmClient`], tests wire in a recording mock.
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Deliver one intent to one device token. Returns the provider message id.
    async fn send_to_token(&self, token: &str, intent: &NotificationIntent)
        -> Result<String, FcmError>;

    /// Deliver one intent to a topic; the provider fans out internally.
    async fn send_to_topic(&self, topic: &str, intent: &NotificationIntent)
        -> Result<String, FcmError>;

    /// Subscribe a batch of tokens to a topic.
    async fn subscribe_to_topic(
        &self,
        tokens: &[String],
        topic: &str,
    ) -> Result<TopicBatchResult, FcmError>;

    /// Unsubscribe a batch of tokens from a topic.
    async fn unsubscribe_from_topic(
        &self,
        tokens: &[String],
        topic: &str,
    ) -> Result<TopicBatchResult, FcmError>;

    /// Dry-run probe distinguishing dead tokens from live ones, with no
    /// user-visible delivery.
    async fn validate_token(&self, token: &str) -> Result<bool, FcmError>;
}

/// Firebase Cloud Messaging HTTP v1 client.
///
/// Manages OAuth2 access-token generation and caching for the service
/// account, and speaks the `messages:send` and Instance ID batch APIs.
pub struct FcmClient {
    pub project_id: String,
    credentials: Arc<ServiceAccountKey>,
    token_cache: Arc<Mutex<Option<TokenCache>>>,
    http_client: reqwest::Client,
    api_base: String,
    iid_base: String,
}

impl FcmClient {
    pub fn new(project_id: String, credentials: ServiceAccountKey) -> Self {
        Self {
            project_id,
            credentials: Arc::new(credentials),
            token_cache: Arc::new(Mutex::new(None)),
            http_client: reqwest::Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            iid_base: DEFAULT_IID_BASE.to_string(),
        }
    }

    /// Load the client from a service-account JSON key file.
    pub fn from_key_file(path: &str) -> Result<Self, FcmError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FcmError::Credentials(format!("read {path}: {e}")))?;
        let key: ServiceAccountKey =
            serde_json::from_str(&raw).map_err(|e| FcmError::Credentials(e.to_string()))?;
        Ok(Self::new(key.project_id.clone(), key))
    }

    /// Override API endpoints, used by integration tests against a stub server.
    pub fn with_endpoints(mut self, api_base: String, iid_base: String) -> Self {
        self.api_base = api_base;
        self.iid_base = iid_base;
        self
    }

    async fn post_send(&self, frame: &FcmSend) -> Result<String, FcmError> {
        let access_token = self.access_token().await?;
        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.api_base, self.project_id
        );

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {access_token}"))
            .header("Content-Type", "application/json")
            .json(frame)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status.is_success() {
            let parsed: FcmApiResponse = response
                .json()
                .await
                .map_err(|e| FcmError::Response(e.to_string()))?;
            let name = parsed
                .name
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            debug!(message_id = %name, "FCM send accepted");
            Ok(name)
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(api_error(status.as_u16(), &text))
        }
    }

    async fn topic_batch(
        &self,
        operation: &str,
        tokens: &[String],
        topic: &str,
    ) -> Result<TopicBatchResult, FcmError> {
        let access_token = self.access_token().await?;
        let url = format!("{}/iid/v1:{}", self.iid_base, operation);
        let body = serde_json::json!({
            "to": format!("/topics/{topic}"),
            "registration_tokens": tokens,
        });

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {access_token}"))
            .header("access_token_auth", "true")
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &text));
        }

        let parsed: IidBatchResponse = response
            .json()
            .await
            .map_err(|e| FcmError::Response(e.to_string()))?;

        // Results come back aligned with the input token order.
        let mut errors = Vec::new();
        for (token, entry) in tokens.iter().zip(parsed.results.iter()) {
            if let Some(err) = &entry.error {
                errors.push(TokenTopicError {
                    token: token.clone(),
                    error: err.clone(),
                });
            }
        }

        Ok(TopicBatchResult {
            topic: topic.to_string(),
            success_count: tokens.len() - errors.len(),
            failure_count: errors.len(),
            errors,
        })
    }

    /// Get an OAuth2 access token for the service account, with caching.
    pub async fn access_token(&self) -> Result<String, FcmError> {
        {
            let cache = self.token_cache.lock().expect("token cache lock poisoned");
            if let Some(cached) = cache.as_ref() {
                // Keep a 60s safety margin before expiry.
                if cached.expires_at > Utc::now().timestamp() + 60 {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let now = Utc::now();
        let claims = OauthClaims {
            iss: self.credentials.client_email.clone(),
            sub: self.credentials.client_email.clone(),
            scope: OAUTH_SCOPE.to_string(),
            aud: self.credentials.token_uri.clone(),
            exp: (now + Duration::hours(1)).timestamp(),
            iat: now.timestamp(),
        };

        let encoding_key = EncodingKey::from_rsa_pem(self.credentials.private_key.as_bytes())
            .map_err(|e| FcmError::Credentials(format!("parse private key: {e}")))?;
        let assertion = encode(&Header::new(jsonwebtoken::Algorithm::RS256), &claims, &encoding_key)
            .map_err(|e| FcmError::Token(format!("encode assertion: {e}")))?;

        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.credentials.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| FcmError::Token(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FcmError::Token(format!(
                "token request failed with status {}",
                response.status()
            )));
        }

        let token_response: GoogleTokenResponse = response
            .json()
            .await
            .map_err(|e| FcmError::Token(e.to_string()))?;

        let expires_at = Utc::now().timestamp() + token_response.expires_in;
        {
            let mut cache = self.token_cache.lock().expect("token cache lock poisoned");
            *cache = Some(TokenCache {
                access_token: token_response.access_token.clone(),
                expires_at,
            });
        }

        Ok(token_response.access_token)
    }
}

#[async_trait]
impl PushProvider for FcmClient {
    async fn send_to_token(
        &self,
        token: &str,
        intent: &NotificationIntent,
    ) -> Result<String, FcmError> {
        let frame = PayloadBuilder::for_token(intent, token);
        self.post_send(&frame).await
    }

    async fn send_to_topic(
        &self,
        topic: &str,
        intent: &NotificationIntent,
    ) -> Result<String, FcmError> {
        let frame = PayloadBuilder::for_topic(intent, topic);
        self.post_send(&frame).await
    }

    async fn subscribe_to_topic(
        &self,
        tokens: &[String],
        topic: &str,
    ) -> Result<TopicBatchResult, FcmError> {
        self.topic_batch("batchAdd", tokens, topic).await
    }

    async fn unsubscribe_from_topic(
        &self,
        tokens: &[String],
        topic: &str,
    ) -> Result<TopicBatchResult, FcmError> {
        self.topic_batch("batchRemove", tokens, topic).await
    }

    async fn validate_token(&self, token: &str) -> Result<bool, FcmError> {
        // Obviously malformed tokens are rejected without a round trip.
        // Registration tokens are typically 100-200 characters.
        if token.len() < 10 || token.len() > 1000 {
            return Ok(false);
        }

        match self.post_send(&PayloadBuilder::probe(token)).await {
            Ok(_) => Ok(true),
            Err(err) => match classify(&err) {
                DeliveryFailure::PermanentInvalid => Ok(false),
                _ => Err(err),
            },
        }
    }
}

fn request_error(err: reqwest::Error) -> FcmError {
    if err.is_timeout() {
        FcmError::Timeout
    } else {
        FcmError::Http(err.to_string())
    }
}

fn api_error(status: u16, body: &str) -> FcmError {
    match serde_json::from_str::<FcmErrorBody>(body) {
        Ok(parsed) => FcmError::Api {
            status,
            error_code: parsed.fcm_error_code(),
            message: parsed
                .error
                .message
                .unwrap_or_else(|| body.to_string()),
        },
        Err(_) => FcmError::Api {
            status,
            error_code: None,
            message: body.to_string(),
        },
    }
}
