//! HTTP handlers.

pub mod health;
pub mod messages;

pub use health::health;
pub use messages::send_message;
