pub mod connect;
pub mod envelope;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod proxy;
pub mod traits;
pub mod transport;
pub mod zmq;

pub use connect::connect;
pub use envelope::Envelope;
pub use error::BrokerError;
#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;
pub use memory::MemoryBroker;
pub use proxy::{EventProxy, ProxyConfig, ProxyMetrics};
pub use traits::{BrokerClient, Subscription};
pub use transport::Transport;
pub use zmq::ZmqBroker;
