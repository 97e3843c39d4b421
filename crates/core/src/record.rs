use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One message delivered by the broker.
///
/// `key` and `payload` are carried exactly as published. The remaining
/// fields are whatever the broker assigned and are only used for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Record {
    /// A record without broker metadata.
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload: payload.into(),
            partition: None,
            offset: None,
            timestamp: None,
        }
    }

    /// Payload decoded as UTF-8 for display. Invalid sequences are replaced.
    pub fn payload_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// What the broker reported when it accepted a published record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAck {
    pub topic: String,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

impl PublishAck {
    pub fn unpositioned(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            offset: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_text_is_lossy() {
        let record = Record::new("t", "k", vec![b'h', b'i', 0xff]);
        assert_eq!(record.payload_text(), "hi\u{fffd}");
    }

    #[test]
    fn new_record_has_no_metadata() {
        let record = Record::new("my-topic", "", Vec::new());
        assert!(record.key.is_empty());
        assert!(record.payload.is_empty());
        assert_eq!(record.partition, None);
        assert_eq!(record.offset, None);
        assert_eq!(record.timestamp, None);
    }
}
