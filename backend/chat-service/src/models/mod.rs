pub mod device;
pub mod message;

pub use device::{DeviceToken, Platform};
pub use message::{MediaMetadata, Message, MessageType, ReadReceipt};
