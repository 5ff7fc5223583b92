pub mod dispatcher;
pub mod topics;

pub use dispatcher::{BatchDeliveryResult, NotificationDispatcher};
pub use topics::TopicSubscriptionManager;
