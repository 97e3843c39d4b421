pub mod error;
pub mod handler;
pub mod listener;
pub mod publisher;

pub use error::{ListenerError, ProcessingError, PublishError};
pub use handler::{describe, handler_fn, FnHandler, LoggingHandler, RecordHandler};
pub use listener::{Listener, ListenerState, ListenerStats};
pub use publisher::Publisher;
