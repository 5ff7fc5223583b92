use std::sync::Arc;

use chat_service::auth::JwtVerifier;
use chat_service::services::{NotificationDispatcher, TopicSubscriptionManager};
use chat_service::storage::postgres::{PgDeviceStore, PgMembershipStore, PgMessageStore};
use chat_service::websocket::pubsub::{start_relay_listener, RelayPublisher};
use chat_service::websocket::{ConnectionRegistry, MessagePipeline, RoomMultiplexer};
use chat_service::{config, db, error, logging, routes, state::AppState};
use tiffin_fcm_shared::{FcmClient, PushProvider};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;

    let pool = db::init_pool(&cfg.database_url).await?;

    let membership: Arc<PgMembershipStore> = Arc::new(PgMembershipStore::new(pool.clone()));
    let messages = Arc::new(PgMessageStore::new(pool.clone()));
    let devices = Arc::new(PgDeviceStore::new(pool.clone()));

    let verifier = JwtVerifier::from_pem(&cfg.jwt_public_key_pem)?;

    // Push is optional: without credentials the chat path still runs and
    // the push endpoints answer 503.
    let provider: Option<Arc<dyn PushProvider>> = match cfg.fcm.as_ref() {
        Some(fcm_cfg) => match FcmClient::from_key_file(&fcm_cfg.credentials_path) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "failed to initialize FCM client; push delivery disabled");
                None
            }
        },
        None => {
            tracing::info!("FCM_CREDENTIALS_PATH not set; push delivery disabled");
            None
        }
    };
    let dispatcher = provider.as_ref().map(|provider| {
        Arc::new(NotificationDispatcher::new(
            provider.clone(),
            devices.clone(),
            cfg.dispatch.clone(),
        ))
    });
    let topics = provider
        .as_ref()
        .map(|provider| Arc::new(TopicSubscriptionManager::new(provider.clone())));

    let registry = ConnectionRegistry::new();
    let rooms = RoomMultiplexer::new();
    let mut pipeline = MessagePipeline::new(
        registry.clone(),
        rooms.clone(),
        membership.clone(),
        messages,
    );
    if let Some(dispatcher) = dispatcher.clone() {
        pipeline = pipeline.with_dispatcher(dispatcher);
    }

    // Cross-instance relay, enabled when redis is configured.
    if let Some(redis_url) = cfg.redis_url.as_deref() {
        let client = redis::Client::open(redis_url)
            .map_err(|e| error::AppError::StartServer(format!("redis: {e}")))?;
        let instance_id = Uuid::new_v4();
        pipeline = pipeline.with_relay(RelayPublisher::new(client.clone(), instance_id));

        let listener_registry = registry.clone();
        let listener_rooms = rooms.clone();
        tokio::spawn(async move {
            if let Err(e) =
                start_relay_listener(client, instance_id, listener_registry, listener_rooms).await
            {
                tracing::error!(error = %e, "relay listener exited");
            }
        });
    } else {
        tracing::info!("REDIS_URL not set; running single-instance");
    }

    let app_state = Arc::new(AppState {
        verifier,
        pipeline: Arc::new(pipeline),
        membership,
        devices,
        dispatcher,
        topics,
        config: cfg,
    });
    let port = app_state.config.port;
    let router = routes::app_router(app_state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?;
    tracing::info!(port, "chat-service listening");
    axum::serve(listener, router)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;

    Ok(())
}
