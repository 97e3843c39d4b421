use std::sync::Arc;

use tracing::info;

use courier_core::{BrokerBackend, BrokerConfig};

use crate::error::BrokerError;
use crate::memory::MemoryBroker;
use crate::traits::BrokerClient;
use crate::zmq::ZmqBroker;

/// Build the broker client selected by `config.backend`.
pub async fn connect(config: &BrokerConfig) -> Result<Arc<dyn BrokerClient>, BrokerError> {
    let client: Arc<dyn BrokerClient> = match config.backend {
        BrokerBackend::Memory => Arc::new(MemoryBroker::new()),
        BrokerBackend::Zmq => Arc::new(ZmqBroker::from_config(&config.zmq).await?),
        BrokerBackend::Kafka => connect_kafka(config)?,
    };
    info!(backend = client.name(), "broker client ready");
    Ok(client)
}

#[cfg(feature = "kafka")]
fn connect_kafka(config: &BrokerConfig) -> Result<Arc<dyn BrokerClient>, BrokerError> {
    Ok(Arc::new(crate::kafka::KafkaBroker::new(&config.kafka)?))
}

#[cfg(not(feature = "kafka"))]
fn connect_kafka(_config: &BrokerConfig) -> Result<Arc<dyn BrokerClient>, BrokerError> {
    Err(BrokerError::Config(
        "BROKER_BACKEND=kafka requires building with the `kafka` feature".to_string(),
    ))
}
