//! Push notification and topic-subscription endpoints.
//!
//! All endpoints here require FCM credentials at startup; without them they
//! answer 503 while chat keeps running.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Deserialize;
use tiffin_fcm_shared::{NotificationIntent, TopicBatchResult};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::routes::{guards, AuthedUser};
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct SendNotificationRequest {
    pub to_user_id: Option<Uuid>,
    pub to_tokens: Option<Vec<String>>,
    pub to_topic: Option<String>,
    #[serde(flatten)]
    pub intent: NotificationIntent,
}

/// `POST /api/v1/notifications/send`. Service identities only; exactly one
/// addressing mode.
pub async fn send_notification(
    State(state): State<SharedState>,
    Extension(AuthedUser(identity)): Extension<AuthedUser>,
    Json(body): Json<SendNotificationRequest>,
) -> AppResult<Json<serde_json::Value>> {
    guards::require_service(&identity)?;
    let dispatcher = state.dispatcher.as_ref().ok_or(AppError::PushUnavailable)?;

    let modes = [
        body.to_user_id.is_some(),
        body.to_tokens.is_some(),
        body.to_topic.is_some(),
    ]
    .iter()
    .filter(|set| **set)
    .count();
    if modes != 1 {
        return Err(AppError::BadRequest(
            "exactly one of to_user_id, to_tokens, to_topic is required".into(),
        ));
    }

    if let Some(user_id) = body.to_user_id {
        let result = dispatcher.send_to_user(user_id, &body.intent).await?;
        return Ok(Json(serde_json::json!({
            "success_count": result.success_count,
            "failure_count": result.failure_count,
            "batch_count": result.batch_count,
            "invalid_tokens": result.invalid_tokens,
        })));
    }

    if let Some(tokens) = body.to_tokens {
        if tokens.is_empty() {
            return Err(AppError::BadRequest("to_tokens must not be empty".into()));
        }
        let result = dispatcher.send_to_tokens(tokens, &body.intent).await?;
        return Ok(Json(serde_json::json!({
            "success_count": result.success_count,
            "failure_count": result.failure_count,
            "batch_count": result.batch_count,
            "invalid_tokens": result.invalid_tokens,
        })));
    }

    let topic = body.to_topic.as_deref().unwrap_or_default();
    validate_topic(topic)?;
    let message_name = dispatcher.send_to_topic(topic, &body.intent).await?;
    Ok(Json(serde_json::json!({ "message_name": message_name })))
}

#[derive(Debug, Deserialize)]
pub struct TopicTokensRequest {
    pub tokens: Vec<String>,
}

/// `POST /api/v1/topics/{topic}/subscriptions`. Service identities only.
pub async fn subscribe_topic(
    State(state): State<SharedState>,
    Extension(AuthedUser(identity)): Extension<AuthedUser>,
    Path(topic): Path<String>,
    Json(body): Json<TopicTokensRequest>,
) -> AppResult<Json<TopicBatchResult>> {
    guards::require_service(&identity)?;
    let topics = state.topics.as_ref().ok_or(AppError::PushUnavailable)?;
    validate_topic(&topic)?;
    if body.tokens.is_empty() {
        return Err(AppError::BadRequest("tokens must not be empty".into()));
    }
    Ok(Json(topics.subscribe(&topic, &body.tokens).await))
}

/// `DELETE /api/v1/topics/{topic}/subscriptions`. Service identities only.
pub async fn unsubscribe_topic(
    State(state): State<SharedState>,
    Extension(AuthedUser(identity)): Extension<AuthedUser>,
    Path(topic): Path<String>,
    Json(body): Json<TopicTokensRequest>,
) -> AppResult<Json<TopicBatchResult>> {
    guards::require_service(&identity)?;
    let topics = state.topics.as_ref().ok_or(AppError::PushUnavailable)?;
    validate_topic(&topic)?;
    if body.tokens.is_empty() {
        return Err(AppError::BadRequest("tokens must not be empty".into()));
    }
    Ok(Json(topics.unsubscribe(&topic, &body.tokens).await))
}

/// FCM topic names are limited to `[a-zA-Z0-9-_.~%]`.
fn validate_topic(topic: &str) -> AppResult<()> {
    let valid = !topic.is_empty()
        && topic.len() <= 900
        && topic
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '%'));
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("invalid topic name: {topic}")))
    }
}
