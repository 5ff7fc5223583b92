pub mod devices;
pub mod guards;
pub mod notifications;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};

use crate::auth::AuthIdentity;
use crate::error::AppError;
use crate::state::SharedState;
use crate::websocket::handlers::ws_handler;

/// Authenticated caller, injected by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct AuthedUser(pub AuthIdentity);

pub fn app_router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/devices", post(devices::register_device))
        .route("/devices/{token}", delete(devices::unregister_device))
        .route("/devices/{token}/owner", put(devices::update_device_owner))
        .route("/notifications/send", post(notifications::send_notification))
        .route(
            "/topics/{topic}/subscriptions",
            post(notifications::subscribe_topic).delete(notifications::unsubscribe_topic),
        )
        .route(
            "/conversations/{conversation_id}/members/{user_id}/eviction",
            post(devices::evict_member),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .nest("/api/v1", api)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chat-service",
    }))
}

pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let identity = state.verifier.verify(token)?;
    request.extensions_mut().insert(AuthedUser(identity));
    Ok(next.run(request).await)
}
