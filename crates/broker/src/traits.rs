use std::sync::Arc;

use async_trait::async_trait;

use courier_core::{OffsetReset, PublishAck, Record};

use crate::error::BrokerError;

/// Narrow client interface to a message broker.
///
/// Implementations are shared across request handlers behind an `Arc`, so
/// every method takes `&self` and must be safe to call concurrently.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Publish one record. Resolves once the broker has accepted it.
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<PublishAck, BrokerError>;

    /// Register a consumer for `topic` under `group_id`.
    ///
    /// `offset_reset` only matters for a group the broker has never seen.
    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        offset_reset: OffsetReset,
    ) -> Result<Box<dyn Subscription>, BrokerError>;

    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;

    /// Release client resources. Open subscriptions may end with `Ok(None)`.
    async fn shutdown(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Blanket implementation so `Arc<dyn BrokerClient>` can be used directly.
#[async_trait]
impl<T: BrokerClient + ?Sized> BrokerClient for Arc<T> {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<PublishAck, BrokerError> {
        (**self).publish(topic, key, payload).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        offset_reset: OffsetReset,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        (**self).subscribe(topic, group_id, offset_reset).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn shutdown(&self) -> Result<(), BrokerError> {
        (**self).shutdown().await
    }
}

/// A live registration against `(topic, group)`.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next record. `Ok(None)` means the subscription is closed
    /// and will never yield again.
    async fn next_record(&mut self) -> Result<Option<Record>, BrokerError>;

    /// Leave the group and release the underlying connection.
    async fn close(&mut self) -> Result<(), BrokerError> {
        Ok(())
    }
}
