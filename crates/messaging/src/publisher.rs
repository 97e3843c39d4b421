//! Publishes keyed payloads to the configured topic.

use std::sync::Arc;

use tracing::{error, info};

use courier_broker::BrokerClient;
use courier_core::{MessagingConfig, PublishAck};

use crate::error::PublishError;

/// Forwards `(key, payload)` to the broker for one fixed topic.
///
/// Cheap to clone; all clones share the same broker handle.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn BrokerClient>,
    topic: String,
}

impl Publisher {
    pub fn new(broker: Arc<dyn BrokerClient>, config: &MessagingConfig) -> Self {
        Self {
            broker,
            topic: config.topic.clone(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one record.
    ///
    /// `key` and `payload` are passed through unchanged, empty values
    /// included. Every call is a separate publish; nothing is deduplicated.
    pub async fn send(&self, key: &str, payload: &[u8]) -> Result<PublishAck, PublishError> {
        info!(topic = %self.topic, key, bytes = payload.len(), "Sending message to topic");

        match self.broker.publish(&self.topic, key, payload).await {
            Ok(ack) => {
                info!(
                    topic = %self.topic,
                    key,
                    partition = ?ack.partition,
                    offset = ?ack.offset,
                    "Message sent to topic"
                );
                Ok(ack)
            }
            Err(e) => {
                error!(topic = %self.topic, key, error = %e, "Failed to send message to topic");
                Err(PublishError::Broker {
                    topic: self.topic.clone(),
                    source: e,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use courier_broker::{BrokerError, Subscription};
    use courier_core::OffsetReset;

    use super::*;

    /// Records every publish call; optionally fails them all.
    struct RecordingBroker {
        calls: Mutex<Vec<(String, String, Vec<u8>)>>,
        fail: bool,
    }

    impl RecordingBroker {
        fn new(fail: bool) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail,
            }
        }

        fn calls(&self) -> Vec<(String, String, Vec<u8>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BrokerClient for RecordingBroker {
        async fn publish(
            &self,
            topic: &str,
            key: &str,
            payload: &[u8],
        ) -> Result<PublishAck, BrokerError> {
            self.calls
                .lock()
                .unwrap()
                .push((topic.to_string(), key.to_string(), payload.to_vec()));
            if self.fail {
                return Err(BrokerError::Connection("broker unreachable".into()));
            }
            Ok(PublishAck::unpositioned(topic))
        }

        async fn subscribe(
            &self,
            _topic: &str,
            _group_id: &str,
            _offset_reset: OffsetReset,
        ) -> Result<Box<dyn Subscription>, BrokerError> {
            Err(BrokerError::Config("not used".into()))
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn publisher(broker: &Arc<RecordingBroker>) -> Publisher {
        Publisher::new(broker.clone(), &MessagingConfig::default())
    }

    #[tokio::test]
    async fn forwards_exact_values_once() {
        let broker = Arc::new(RecordingBroker::new(false));
        let ack = publisher(&broker)
            .send("user-42", b"order-created")
            .await
            .unwrap();

        assert_eq!(ack.topic, "my-topic");
        assert_eq!(
            broker.calls(),
            vec![(
                "my-topic".to_string(),
                "user-42".to_string(),
                b"order-created".to_vec()
            )]
        );
    }

    #[tokio::test]
    async fn identical_sends_are_not_deduplicated() {
        let broker = Arc::new(RecordingBroker::new(false));
        let publisher = publisher(&broker);
        publisher.send("k", b"v").await.unwrap();
        publisher.send("k", b"v").await.unwrap();

        let calls = broker.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn empty_key_and_payload_are_forwarded() {
        let broker = Arc::new(RecordingBroker::new(false));
        publisher(&broker).send("", b"").await.unwrap();

        let calls = broker.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "");
        assert!(calls[0].2.is_empty());
    }

    #[tokio::test]
    async fn binary_payload_is_not_touched() {
        let broker = Arc::new(RecordingBroker::new(false));
        let payload = [0u8, 0xff, 0xfe, b'\n'];
        publisher(&broker).send("bin", &payload).await.unwrap();
        assert_eq!(broker.calls()[0].2, payload);
    }

    #[tokio::test]
    async fn broker_failure_is_returned_to_caller() {
        let broker = Arc::new(RecordingBroker::new(true));
        let err = publisher(&broker).send("k", b"v").await.unwrap_err();

        let PublishError::Broker { topic, source } = &err;
        assert_eq!(topic, "my-topic");
        assert!(matches!(source, BrokerError::Connection(_)));
        assert!(err.to_string().contains("broker unreachable"));
        // The attempt still reached the broker exactly once.
        assert_eq!(broker.calls().len(), 1);
    }
}
