//! In-process broker.
//!
//! One append-only log per topic (a single partition, offsets from 0) and one
//! committed position per consumer group. Members of the same group compete
//! for records; separate groups each read the whole log.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::debug;

use courier_core::{OffsetReset, PublishAck, Record};

use crate::error::BrokerError;
use crate::traits::{BrokerClient, Subscription};

const PARTITION: i32 = 0;

struct TopicLog {
    records: Vec<Record>,
    /// Next offset to deliver, per consumer group.
    positions: HashMap<String, usize>,
    /// Bumped on every append and on shutdown to wake waiting subscribers.
    changed: watch::Sender<u64>,
}

impl TopicLog {
    fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            records: Vec::new(),
            positions: HashMap::new(),
            changed,
        }
    }
}

#[derive(Default)]
struct Inner {
    topics: HashMap<String, TopicLog>,
    closed: bool,
}

/// In-memory [`BrokerClient`]. Cloning shares the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record appended to `topic`.
    pub async fn records(&self, topic: &str) -> Vec<Record> {
        let inner = self.inner.lock().await;
        inner
            .topics
            .get(topic)
            .map(|log| log.records.clone())
            .unwrap_or_default()
    }

    /// Committed position of `group` on `topic`, if the group ever subscribed.
    pub async fn position(&self, topic: &str, group: &str) -> Option<usize> {
        let inner = self.inner.lock().await;
        inner
            .topics
            .get(topic)
            .and_then(|log| log.positions.get(group).copied())
    }

    /// Names of all provisioned topics, sorted.
    pub async fn topics(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner.topics.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<PublishAck, BrokerError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(BrokerError::Closed);
        }

        let log = inner
            .topics
            .entry(topic.to_string())
            .or_insert_with(TopicLog::new);
        let offset = log.records.len() as i64;
        log.records.push(Record {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_vec(),
            partition: Some(PARTITION),
            offset: Some(offset),
            timestamp: Some(Utc::now()),
        });
        log.changed.send_modify(|v| *v += 1);

        debug!(topic, key, offset, "appended record");
        Ok(PublishAck {
            topic: topic.to_string(),
            partition: Some(PARTITION),
            offset: Some(offset),
        })
    }

    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        offset_reset: OffsetReset,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(BrokerError::Closed);
        }

        let log = inner
            .topics
            .entry(topic.to_string())
            .or_insert_with(TopicLog::new);
        let end = log.records.len();
        let position = *log
            .positions
            .entry(group_id.to_string())
            .or_insert(match offset_reset {
                OffsetReset::Earliest => 0,
                OffsetReset::Latest => end,
            });
        let changes = log.changed.subscribe();

        debug!(topic, group_id, position, "memory subscription registered");
        Ok(Box::new(MemorySubscription {
            inner: self.inner.clone(),
            topic: topic.to_string(),
            group: group_id.to_string(),
            changes,
            closed: false,
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn shutdown(&self) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        for log in inner.topics.values() {
            log.changed.send_modify(|v| *v += 1);
        }
        Ok(())
    }
}

struct MemorySubscription {
    inner: Arc<Mutex<Inner>>,
    topic: String,
    group: String,
    changes: watch::Receiver<u64>,
    closed: bool,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_record(&mut self) -> Result<Option<Record>, BrokerError> {
        loop {
            // Mark the current version as seen before looking at the log, so an
            // append racing with this check still wakes `changed()` below.
            self.changes.borrow_and_update();

            {
                let mut inner = self.inner.lock().await;
                if inner.closed || self.closed {
                    return Ok(None);
                }
                if let Some(log) = inner.topics.get_mut(&self.topic) {
                    let position = log.positions.entry(self.group.clone()).or_insert(0);
                    if let Some(record) = log.records.get(*position) {
                        *position += 1;
                        return Ok(Some(record.clone()));
                    }
                }
            }

            if self.changes.changed().await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.closed = true;
        Ok(())
    }
}
