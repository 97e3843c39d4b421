//! Publisher and listener error types.

use thiserror::Error;

use courier_broker::BrokerError;

/// The broker did not accept a published record.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to publish to topic '{topic}': {source}")]
    Broker { topic: String, source: BrokerError },
}

/// A record handler could not process a record.
#[derive(Debug, Error)]
#[error("record processing failed: {0}")]
pub struct ProcessingError(pub String);

impl ProcessingError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("listener is already running")]
    AlreadyRunning,

    #[error("failed to subscribe to '{topic}' as group '{group}': {source}")]
    Subscribe {
        topic: String,
        group: String,
        source: BrokerError,
    },

    #[error("listener task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
