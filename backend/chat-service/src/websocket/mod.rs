pub mod events;
pub mod handlers;
pub mod message_types;
pub mod pipeline;
pub mod pubsub;
pub mod registry;
pub mod rooms;

pub use pipeline::MessagePipeline;
pub use registry::{ConnectionId, ConnectionRegistry};
pub use rooms::RoomMultiplexer;
