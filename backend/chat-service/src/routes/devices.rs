//! Device-token registration and membership-eviction endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{DeviceToken, Platform};
use crate::routes::{guards, AuthedUser};
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    pub token: String,
    pub platform: String,
}

/// `POST /api/v1/devices`. Registers the token to the calling user;
/// re-registering an existing token value hands it over.
pub async fn register_device(
    State(state): State<SharedState>,
    Extension(AuthedUser(identity)): Extension<AuthedUser>,
    Json(body): Json<RegisterDeviceRequest>,
) -> AppResult<StatusCode> {
    let user_id = identity.user_id;
    if body.token.len() < 10 {
        return Err(AppError::BadRequest("token is too short".into()));
    }
    let platform = Platform::parse(&body.platform)
        .ok_or_else(|| AppError::BadRequest(format!("unknown platform: {}", body.platform)))?;

    state
        .devices
        .register(DeviceToken {
            token: body.token,
            user_id,
            platform,
            registered_at: Utc::now(),
        })
        .await?;

    info!(%user_id, platform = platform.as_str(), "device token registered");
    Ok(StatusCode::CREATED)
}

/// `DELETE /api/v1/devices/{token}`. Only the current owner may remove it.
pub async fn unregister_device(
    State(state): State<SharedState>,
    Extension(AuthedUser(identity)): Extension<AuthedUser>,
    Path(token): Path<String>,
) -> AppResult<StatusCode> {
    let user_id = identity.user_id;
    match state.devices.owner_of(&token).await? {
        None => Err(AppError::NotFound),
        Some(owner) if owner != user_id => Err(AppError::Forbidden),
        Some(_) => {
            state.devices.unregister(&token).await?;
            Ok(StatusCode::NO_CONTENT)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateOwnerRequest {
    pub user_id: Uuid,
}

/// `PUT /api/v1/devices/{token}/owner`. Device handover on account switch:
/// the calling user, who holds the session on the device, assigns the token
/// to the account it now belongs to.
pub async fn update_device_owner(
    State(state): State<SharedState>,
    Extension(AuthedUser(identity)): Extension<AuthedUser>,
    Path(token): Path<String>,
    Json(body): Json<UpdateOwnerRequest>,
) -> AppResult<StatusCode> {
    let caller = identity.user_id;
    let owner = state.devices.owner_of(&token).await?.ok_or(AppError::NotFound)?;
    if owner != caller && body.user_id != caller {
        return Err(AppError::Forbidden);
    }

    state.devices.update_owner(&token, body.user_id).await?;
    info!(new_owner = %body.user_id, "device token reassigned");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/v1/conversations/{conversation_id}/members/{user_id}/eviction`.
///
/// Called by the membership owner (subscription/order service) when a user
/// loses access mid-session, or by a conversation owner/admin. Force-leaves
/// every live connection of that user from the room, on this instance and
/// on peers.
pub async fn evict_member(
    State(state): State<SharedState>,
    Extension(AuthedUser(identity)): Extension<AuthedUser>,
    Path((conversation_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    guards::require_conversation_privilege(
        state.membership.as_ref(),
        &identity,
        conversation_id,
    )
    .await?;

    state.pipeline.evict(conversation_id, user_id).await;
    info!(%conversation_id, %user_id, "member evicted from conversation");
    Ok(StatusCode::NO_CONTENT)
}
