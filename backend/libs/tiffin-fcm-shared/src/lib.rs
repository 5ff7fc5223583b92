//! Shared FCM push-delivery library for the tiffin platform.
//!
//! Everything that talks to Firebase Cloud Messaging lives here: the HTTP v1
//! client with OAuth2 service-account token exchange, the channel-aware
//! payload builder, and the delivery-failure classifier. Services depend on
//! the [`PushProvider`] trait rather than the concrete client so delivery
//! logic stays testable without network access.

pub mod classify;
pub mod client;
pub mod errors;
pub mod models;
pub mod payload;

pub use classify::{classify, DeliveryFailure};
pub use client::{FcmClient, PushProvider};
pub use errors::FcmError;
pub use models::{
    NotificationIntent, PushPriority, ServiceAccountKey, TokenTopicError, TopicBatchResult,
};
pub use payload::PayloadBuilder;
