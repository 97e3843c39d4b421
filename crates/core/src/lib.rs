pub mod config;
pub mod error;
pub mod record;
pub mod shutdown;

pub use config::{BrokerBackend, BrokerConfig, Config, MessagingConfig, OffsetReset};
pub use error::*;
pub use record::*;
pub use shutdown::shutdown_signal;
