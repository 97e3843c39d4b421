//! Consumer-group listener with an explicit start/stop lifecycle.
//!
//! [`Listener::start`] subscribes and spawns a poll task that hands every
//! record to a [`RecordHandler`]. [`Listener::stop`] signals the task, waits
//! for the in-flight record to finish and releases the subscription.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use courier_broker::{BrokerClient, Subscription};
use courier_core::{MessagingConfig, Record};

use crate::error::ListenerError;
use crate::handler::RecordHandler;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ── State and stats ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    /// Not started yet, or the last start attempt failed.
    Unsubscribed,
    /// Waiting for the next record.
    Polling,
    /// A record is being handled.
    Processing,
    Stopped,
}

impl ListenerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsubscribed => "unsubscribed",
            Self::Polling => "polling",
            Self::Processing => "processing",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ListenerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the listener counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    pub processed: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ListenerStats {
        ListenerStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

// ── Listener ─────────────────────────────────────────────────────────

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Subscribes to the configured topic under the configured consumer group
/// and processes records until stopped.
pub struct Listener {
    broker: Arc<dyn BrokerClient>,
    config: MessagingConfig,
    handler: Arc<dyn RecordHandler>,
    retry_delay: Duration,
    shutdown_timeout: Duration,
    state: Arc<watch::Sender<ListenerState>>,
    counters: Arc<Counters>,
    running: Option<Running>,
}

impl Listener {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        config: MessagingConfig,
        handler: Arc<dyn RecordHandler>,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Unsubscribed);
        Self {
            broker,
            config,
            handler,
            retry_delay: DEFAULT_RETRY_DELAY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            state: Arc::new(state),
            counters: Arc::new(Counters::default()),
            running: None,
        }
    }

    /// Pause between a failed receive and the next attempt (default: 500ms).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// How long [`stop`](Self::stop) waits for the in-flight record before
    /// aborting the poll task (default: 5s).
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> ListenerStats {
        self.counters.snapshot()
    }

    /// `false` once the poll task has ended, including when the broker
    /// closed the subscription without [`stop`](Self::stop) being called.
    pub fn is_running(&self) -> bool {
        match &self.running {
            Some(running) => {
                !running.handle.is_finished() && self.state() != ListenerState::Stopped
            }
            None => false,
        }
    }

    /// Subscribe and begin polling in a background task.
    ///
    /// Fails with [`ListenerError::AlreadyRunning`] if a poll task is active,
    /// and with [`ListenerError::Subscribe`] if the broker refuses the
    /// subscription. In the latter case nothing is spawned.
    pub async fn start(&mut self) -> Result<(), ListenerError> {
        if self.is_running() {
            return Err(ListenerError::AlreadyRunning);
        }
        if let Some(ended) = self.running.take() {
            if let Err(e) = ended.handle.await {
                warn!(error = %e, "Previous poll task ended abnormally");
            }
        }

        let topic = self.config.topic.clone();
        let group = self.config.consumer_group.clone();

        let subscription = match self
            .broker
            .subscribe(&topic, &group, self.config.offset_reset)
            .await
        {
            Ok(subscription) => subscription,
            Err(source) => {
                self.state.send_replace(ListenerState::Unsubscribed);
                return Err(ListenerError::Subscribe {
                    topic,
                    group,
                    source,
                });
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.state.send_replace(ListenerState::Polling);

        let poll = PollLoop {
            subscription,
            handler: self.handler.clone(),
            state: self.state.clone(),
            counters: self.counters.clone(),
            retry_delay: self.retry_delay,
            topic: topic.clone(),
            group: group.clone(),
        };
        let handle = tokio::spawn(poll.run(shutdown_rx));

        self.running = Some(Running {
            shutdown: shutdown_tx,
            handle,
        });
        info!(
            topic = %topic,
            group = %group,
            broker = self.broker.name(),
            offset_reset = %self.config.offset_reset,
            "Listener started"
        );
        Ok(())
    }

    /// Stop polling and release the subscription.
    ///
    /// Safe to call repeatedly and before [`start`](Self::start). Returns the
    /// final counters.
    pub async fn stop(&mut self) -> Result<ListenerStats, ListenerError> {
        let Some(Running { shutdown, mut handle }) = self.running.take() else {
            return Ok(self.stats());
        };

        let _ = shutdown.send(true);
        let joined = match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "Listener did not stop in time, aborting poll task"
                );
                handle.abort();
                // Dropping the aborted task drops its subscription.
                match handle.await {
                    Err(e) if e.is_cancelled() => Ok(()),
                    other => other,
                }
            }
        };

        self.state.send_replace(ListenerState::Stopped);
        joined?;
        Ok(self.stats())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown.send(true);
        }
    }
}

// ── Poll loop ────────────────────────────────────────────────────────

struct PollLoop {
    subscription: Box<dyn Subscription>,
    handler: Arc<dyn RecordHandler>,
    state: Arc<watch::Sender<ListenerState>>,
    counters: Arc<Counters>,
    retry_delay: Duration,
    topic: String,
    group: String,
}

impl PollLoop {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;

                // Also fires when the Listener is dropped.
                _ = shutdown.changed() => break,

                result = self.subscription.next_record() => match result {
                    Ok(Some(record)) => self.process(record).await,
                    Ok(None) => {
                        info!(topic = %self.topic, group = %self.group, "Subscription closed by broker");
                        break;
                    }
                    Err(e) => {
                        warn!(
                            topic = %self.topic,
                            group = %self.group,
                            error = %e,
                            retry_ms = self.retry_delay.as_millis() as u64,
                            "Failed to receive record, retrying"
                        );
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(self.retry_delay) => {}
                        }
                    }
                },
            }
        }

        if let Err(e) = self.subscription.close().await {
            warn!(topic = %self.topic, error = %e, "Failed to close subscription");
        }
        self.state.send_replace(ListenerState::Stopped);

        let stats = self.counters.snapshot();
        info!(
            topic = %self.topic,
            group = %self.group,
            processed = stats.processed,
            failed = stats.failed,
            "Listener stopped"
        );
    }

    async fn process(&mut self, record: Record) {
        self.state.send_replace(ListenerState::Processing);

        match self.handler.on_record(&record).await {
            Ok(()) => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    topic = %record.topic,
                    key = %record.key,
                    offset = ?record.offset,
                    error = %e,
                    "Record handler failed, skipping record"
                );
            }
        }

        self.state.send_replace(ListenerState::Polling);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use courier_broker::{BrokerError, MemoryBroker};
    use courier_core::{OffsetReset, PublishAck};

    use super::*;
    use crate::error::ProcessingError;
    use crate::handler::handler_fn;

    const WAIT: Duration = Duration::from_secs(2);

    fn channel_handler() -> (Arc<dyn RecordHandler>, mpsc::UnboundedReceiver<Record>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = handler_fn(move |record: Record| {
            let tx = tx.clone();
            async move {
                tx.send(record)
                    .map_err(|e| ProcessingError::new(e.to_string()))
            }
        });
        (Arc::new(handler), rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Record>) -> Record {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for record")
            .expect("handler channel closed")
    }

    /// Subscription that replays a fixed script, then waits forever.
    struct ScriptedSubscription {
        script: VecDeque<Result<Option<Record>, BrokerError>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Subscription for ScriptedSubscription {
        async fn next_record(&mut self) -> Result<Option<Record>, BrokerError> {
            match self.script.pop_front() {
                Some(step) => step,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<(), BrokerError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ScriptedBroker {
        script: std::sync::Mutex<Option<VecDeque<Result<Option<Record>, BrokerError>>>>,
        closed: Arc<AtomicBool>,
        refuse: bool,
    }

    impl ScriptedBroker {
        fn new(script: Vec<Result<Option<Record>, BrokerError>>) -> Self {
            Self {
                script: std::sync::Mutex::new(Some(script.into())),
                closed: Arc::new(AtomicBool::new(false)),
                refuse: false,
            }
        }

        fn refusing() -> Self {
            Self {
                refuse: true,
                ..Self::new(Vec::new())
            }
        }
    }

    #[async_trait]
    impl BrokerClient for ScriptedBroker {
        async fn publish(
            &self,
            topic: &str,
            _key: &str,
            _payload: &[u8],
        ) -> Result<PublishAck, BrokerError> {
            Ok(PublishAck::unpositioned(topic))
        }

        async fn subscribe(
            &self,
            _topic: &str,
            _group_id: &str,
            _offset_reset: OffsetReset,
        ) -> Result<Box<dyn Subscription>, BrokerError> {
            if self.refuse {
                return Err(BrokerError::Connection("no brokers available".into()));
            }
            let script = self.script.lock().unwrap().take().unwrap_or_default();
            Ok(Box::new(ScriptedSubscription {
                script,
                closed: self.closed.clone(),
            }))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn delivers_each_record_exactly_once() {
        let broker = MemoryBroker::new();
        let (handler, mut rx) = channel_handler();
        let mut listener = Listener::new(Arc::new(broker.clone()), MessagingConfig::default(), handler);

        listener.start().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Polling);

        broker.publish("my-topic", "k1", b"hello").await.unwrap();
        let record = recv(&mut rx).await;
        assert_eq!(record.key, "k1");
        assert_eq!(record.payload, b"hello");

        let stats = listener.stop().await.unwrap();
        assert_eq!(stats, ListenerStats { processed: 1, failed: 0 });
        assert!(rx.try_recv().is_err());
        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let broker = Arc::new(MemoryBroker::new());
        let (handler, _rx) = channel_handler();
        let mut listener = Listener::new(broker, MessagingConfig::default(), handler);

        listener.start().await.unwrap();
        assert!(matches!(
            listener.start().await,
            Err(ListenerError::AlreadyRunning)
        ));
        listener.stop().await.unwrap();
    }

    #[tokio::test]
    async fn subscribe_failure_is_reported() {
        let (handler, _rx) = channel_handler();
        let mut listener = Listener::new(
            Arc::new(ScriptedBroker::refusing()),
            MessagingConfig::default(),
            handler,
        );

        let err = listener.start().await.unwrap_err();
        match err {
            ListenerError::Subscribe { topic, group, .. } => {
                assert_eq!(topic, "my-topic");
                assert_eq!(group, "kafka-demo-group");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(listener.state(), ListenerState::Unsubscribed);
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_safe_before_start() {
        let (handler, _rx) = channel_handler();
        let mut listener = Listener::new(
            Arc::new(MemoryBroker::new()),
            MessagingConfig::default(),
            handler,
        );

        assert_eq!(listener.stop().await.unwrap(), ListenerStats::default());
        listener.start().await.unwrap();
        listener.stop().await.unwrap();
        listener.stop().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[tokio::test]
    async fn stop_releases_subscription() {
        let broker = Arc::new(ScriptedBroker::new(Vec::new()));
        let closed = broker.closed.clone();
        let (handler, _rx) = channel_handler();
        let mut listener = Listener::new(broker, MessagingConfig::default(), handler);

        listener.start().await.unwrap();
        assert!(!closed.load(Ordering::SeqCst));
        listener.stop().await.unwrap();
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn handler_failure_does_not_stop_the_loop() {
        let broker = MemoryBroker::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = handler_fn(move |record: Record| {
            let tx = tx.clone();
            async move {
                if record.key == "poison" {
                    return Err(ProcessingError::new("cannot parse"));
                }
                tx.send(record).map_err(|e| ProcessingError::new(e.to_string()))
            }
        });
        let mut listener = Listener::new(
            Arc::new(broker.clone()),
            MessagingConfig::default(),
            Arc::new(handler),
        );
        listener.start().await.unwrap();

        broker.publish("my-topic", "poison", b"x").await.unwrap();
        broker.publish("my-topic", "good", b"y").await.unwrap();

        assert_eq!(recv(&mut rx).await.key, "good");
        let stats = listener.stop().await.unwrap();
        assert_eq!(stats, ListenerStats { processed: 1, failed: 1 });
    }

    #[tokio::test]
    async fn receive_error_is_retried() {
        let broker = Arc::new(ScriptedBroker::new(vec![
            Err(BrokerError::Transport("connection reset".into())),
            Ok(Some(Record::new("my-topic", "after-retry", b"ok".to_vec()))),
        ]));
        let (handler, mut rx) = channel_handler();
        let mut listener = Listener::new(broker, MessagingConfig::default(), handler)
            .with_retry_delay(Duration::from_millis(10));

        listener.start().await.unwrap();
        assert_eq!(recv(&mut rx).await.key, "after-retry");
        listener.stop().await.unwrap();
    }

    #[tokio::test]
    async fn broker_shutdown_ends_the_poll_task() {
        let broker = MemoryBroker::new();
        let (handler, _rx) = channel_handler();
        let mut listener = Listener::new(Arc::new(broker.clone()), MessagingConfig::default(), handler);
        let mut states = listener.watch_state();

        listener.start().await.unwrap();
        broker.shutdown().await.unwrap();

        tokio::time::timeout(WAIT, states.wait_for(|s| *s == ListenerState::Stopped))
            .await
            .expect("listener did not stop")
            .unwrap();
        listener.stop().await.unwrap();
    }

    #[tokio::test]
    async fn listener_can_restart_after_subscription_closes() {
        let broker = Arc::new(ScriptedBroker::new(vec![Ok(None)]));
        let (handler, _rx) = channel_handler();
        let mut listener = Listener::new(broker, MessagingConfig::default(), handler);
        let mut states = listener.watch_state();

        listener.start().await.unwrap();
        tokio::time::timeout(WAIT, states.wait_for(|s| *s == ListenerState::Stopped))
            .await
            .expect("listener did not stop")
            .unwrap();
        assert!(!listener.is_running());

        listener.start().await.unwrap();
        assert!(listener.is_running());
        assert_eq!(listener.state(), ListenerState::Polling);
        listener.stop().await.unwrap();
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn slow_handler_is_aborted_after_shutdown_timeout() {
        let broker = MemoryBroker::new();
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let handler = handler_fn(move |_record: Record| {
            let entered_tx = entered_tx.clone();
            async move {
                let _ = entered_tx.send(());
                std::future::pending::<()>().await;
                Ok(())
            }
        });
        let mut listener = Listener::new(
            Arc::new(broker.clone()),
            MessagingConfig::default(),
            Arc::new(handler),
        )
        .with_shutdown_timeout(Duration::from_millis(50));

        listener.start().await.unwrap();
        broker.publish("my-topic", "stuck", b"").await.unwrap();
        tokio::time::timeout(WAIT, entered_rx.recv()).await.unwrap();
        assert_eq!(listener.state(), ListenerState::Processing);

        let stats = listener.stop().await.unwrap();
        assert_eq!(stats.processed, 0);
        assert_eq!(listener.state(), ListenerState::Stopped);
    }
}
