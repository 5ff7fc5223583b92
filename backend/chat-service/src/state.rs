use std::sync::Arc;

use crate::auth::JwtVerifier;
use crate::config::Config;
use crate::services::{NotificationDispatcher, TopicSubscriptionManager};
use crate::storage::{DeviceStore, MembershipStore};
use crate::websocket::MessagePipeline;

/// Shared application state handed to every handler.
///
/// The dispatcher and topic manager are absent when no FCM credentials are
/// configured; chat keeps working and the push endpoints return 503.
pub struct AppState {
    pub config: Config,
    pub verifier: JwtVerifier,
    pub pipeline: Arc<MessagePipeline>,
    pub membership: Arc<dyn MembershipStore>,
    pub devices: Arc<dyn DeviceStore>,
    pub dispatcher: Option<Arc<NotificationDispatcher>>,
    pub topics: Option<Arc<TopicSubscriptionManager>>,
}

pub type SharedState = Arc<AppState>;
