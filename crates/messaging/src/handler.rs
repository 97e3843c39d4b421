use std::future::Future;

use async_trait::async_trait;
use tracing::info;

use courier_core::Record;

use crate::error::ProcessingError;

/// Processes records handed over by a [`crate::Listener`].
///
/// Returning an error marks the record as failed. The listener logs it and
/// moves on to the next record.
#[async_trait]
pub trait RecordHandler: Send + Sync {
    async fn on_record(&self, record: &Record) -> Result<(), ProcessingError>;
}

/// `Key = <key>, Value = <payload>` with the payload decoded lossily.
pub fn describe(record: &Record) -> String {
    format!("Key = {}, Value = {}", record.key, record.payload_text())
}

/// Logs every record at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

#[async_trait]
impl RecordHandler for LoggingHandler {
    async fn on_record(&self, record: &Record) -> Result<(), ProcessingError> {
        info!(
            topic = %record.topic,
            partition = ?record.partition,
            offset = ?record.offset,
            "Consumed message: {}",
            describe(record)
        );
        Ok(())
    }
}

/// Wraps an async closure as a [`RecordHandler`].
pub struct FnHandler<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Record) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProcessingError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> RecordHandler for FnHandler<F>
where
    F: Fn(Record) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProcessingError>> + Send + 'static,
{
    async fn on_record(&self, record: &Record) -> Result<(), ProcessingError> {
        (self.0)(record.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn describe_formats_key_and_value() {
        let record = Record::new("my-topic", "user-42", b"order-created".to_vec());
        assert_eq!(describe(&record), "Key = user-42, Value = order-created");
    }

    #[test]
    fn describe_handles_empty_and_invalid_payloads() {
        assert_eq!(describe(&Record::new("t", "", Vec::new())), "Key = , Value = ");
        assert_eq!(
            describe(&Record::new("t", "k", vec![0xff])),
            "Key = k, Value = \u{fffd}"
        );
    }

    /// In-memory sink for the fmt subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn logging_handler_writes_key_and_value_line() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let record = Record::new("my-topic", "user-42", b"order-created".to_vec());
        LoggingHandler.on_record(&record).await.unwrap();

        let output = logs.contents();
        assert!(
            output.contains("Consumed message: Key = user-42, Value = order-created"),
            "{output}"
        );
        assert!(output.contains("INFO"), "{output}");
        assert!(output.contains("topic=my-topic"), "{output}");
    }

    #[tokio::test]
    async fn logging_handler_never_fails() {
        let record = Record::new("t", "k", vec![0xde, 0xad]);
        assert!(LoggingHandler.on_record(&record).await.is_ok());
    }

    #[tokio::test]
    async fn fn_handler_invokes_closure() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handler = handler_fn(move |record: Record| {
            let counter = counter.clone();
            async move {
                if record.key == "bad" {
                    return Err(ProcessingError::new("rejected"));
                }
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        handler.on_record(&Record::new("t", "ok", Vec::new())).await.unwrap();
        let err = handler
            .on_record(&Record::new("t", "bad", Vec::new()))
            .await
            .unwrap_err();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(err.to_string(), "record processing failed: rejected");
    }
}
