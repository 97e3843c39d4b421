//! Apache Kafka client built on `rdkafka`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tracing::{debug, info};

use courier_core::config::KafkaConfig;
use courier_core::{OffsetReset, PublishAck, Record};

use crate::error::BrokerError;
use crate::traits::{BrokerClient, Subscription};

/// [`BrokerClient`] for a Kafka cluster.
///
/// One shared `FutureProducer`; every subscription creates its own
/// `StreamConsumer` so each listener joins the group independently.
pub struct KafkaBroker {
    producer: FutureProducer,
    config: KafkaConfig,
}

impl KafkaBroker {
    pub fn new(config: &KafkaConfig) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("client.id", &config.client_id)
            .set("message.timeout.ms", config.delivery_timeout_ms.to_string())
            .create()?;

        info!(
            bootstrap = %config.bootstrap_servers,
            client_id = %config.client_id,
            "Kafka producer initialized"
        );
        Ok(Self {
            producer,
            config: config.clone(),
        })
    }

    fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.config.delivery_timeout_ms)
    }
}

#[async_trait]
impl BrokerClient for KafkaBroker {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<PublishAck, BrokerError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);
        match self
            .producer
            .send(record, Timeout::After(self.delivery_timeout()))
            .await
        {
            Ok((partition, offset)) => {
                debug!(topic, key, partition, offset, "Kafka delivery confirmed");
                Ok(PublishAck {
                    topic: topic.to_string(),
                    partition: Some(partition),
                    offset: Some(offset),
                })
            }
            Err((err, _unsent)) => match err.rdkafka_error_code() {
                Some(RDKafkaErrorCode::MessageTimedOut) => {
                    Err(BrokerError::Timeout(self.delivery_timeout()))
                }
                _ => Err(BrokerError::Kafka(err)),
            },
        }
    }

    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        offset_reset: OffsetReset,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.bootstrap_servers)
            .set("client.id", &self.config.client_id)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", offset_reset.as_str())
            .create()?;
        consumer.subscribe(&[topic])?;

        info!(topic, group_id, offset_reset = %offset_reset, "Kafka consumer subscribed");
        Ok(Box::new(KafkaSubscription {
            consumer: Some(consumer),
        }))
    }

    fn name(&self) -> &'static str {
        "kafka"
    }
}

struct KafkaSubscription {
    consumer: Option<StreamConsumer>,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn next_record(&mut self) -> Result<Option<Record>, BrokerError> {
        let Some(consumer) = self.consumer.as_ref() else {
            return Ok(None);
        };

        let message = consumer.recv().await?;
        let key = message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default();
        let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
        let timestamp = message
            .timestamp()
            .to_millis()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        Ok(Some(Record {
            topic: message.topic().to_string(),
            key,
            payload,
            partition: Some(message.partition()),
            offset: Some(message.offset()),
            timestamp,
        }))
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            debug!("Kafka consumer left the group");
        }
        Ok(())
    }
}
