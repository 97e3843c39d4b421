use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_core::Record;

/// Wire format for records travelling through the ZeroMQ proxy.
///
/// Serialized with MessagePack. The payload is carried as raw bytes and is
/// never interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub key: String,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    /// Publisher-assigned id, useful for tracing a record across processes.
    pub id: Uuid,
    #[serde(default = "default_version")]
    pub version: u16,
}

fn default_version() -> u16 {
    1
}

impl Envelope {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: &[u8]) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload: payload.to_vec(),
            timestamp: Utc::now(),
            id: Uuid::new_v4(),
            version: 1,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }

    pub fn into_record(self) -> Record {
        Record {
            topic: self.topic,
            key: self.key,
            payload: self.payload,
            partition: None,
            offset: None,
            timestamp: Some(self.timestamp),
        }
    }
}

/// Serde helper so `Vec<u8>` is written as a MessagePack bin, not an array.
mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}
