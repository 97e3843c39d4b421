//! ZeroMQ rendezvous between courier publishers and subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use zeromq::prelude::*;
use zeromq::{PubSocket, RepSocket, SubSocket, ZmqMessage};

use courier_core::config::ZmqConfig;

use crate::error::BrokerError;
use crate::transport::Transport;

/// Pause after a failed receive so a broken socket does not spin the loop.
const RECV_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Forwarding counters.
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    total: AtomicU64,
    per_topic: Mutex<HashMap<String, u64>>,
}

impl ProxyMetrics {
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub async fn topic_count(&self, topic: &str) -> u64 {
        self.per_topic.lock().await.get(topic).copied().unwrap_or(0)
    }

    /// Per-topic counts, sorted by topic.
    pub async fn topics(&self) -> Vec<(String, u64)> {
        let mut counts: Vec<_> = self
            .per_topic
            .lock()
            .await
            .iter()
            .map(|(topic, n)| (topic.clone(), *n))
            .collect();
        counts.sort();
        counts
    }

    async fn record(&self, topic: &str) {
        self.total.fetch_add(1, Ordering::Relaxed);
        *self
            .per_topic
            .lock()
            .await
            .entry(topic.to_string())
            .or_insert(0) += 1;
    }
}

/// Socket endpoints of the proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Publishers connect here (proxy binds SUB).
    pub frontend: Transport,
    /// Subscribers connect here (proxy binds PUB).
    pub backend: Transport,
    /// REP socket answering liveness checks.
    pub health: Transport,
}

impl ProxyConfig {
    pub fn local(prefix: &str) -> Self {
        Self {
            frontend: Transport::ipc(&format!("{prefix}-frontend")),
            backend: Transport::ipc(&format!("{prefix}-backend")),
            health: Transport::ipc(&format!("{prefix}-health")),
        }
    }

    pub fn tcp(host: &str, frontend_port: u16, backend_port: u16, health_port: u16) -> Self {
        Self {
            frontend: Transport::tcp(host, frontend_port),
            backend: Transport::tcp(host, backend_port),
            health: Transport::tcp(host, health_port),
        }
    }

    pub fn from_zmq_config(config: &ZmqConfig) -> Result<Self, BrokerError> {
        match config.transport.as_str() {
            "tcp" => Ok(Self::tcp(
                &config.host,
                config.frontend_port,
                config.backend_port,
                config.health_port,
            )),
            "ipc" => Ok(Self::local(&config.ipc_prefix)),
            other => Err(BrokerError::Config(format!(
                "unknown zmq transport '{other}' (expected tcp or ipc)"
            ))),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::local("courier")
    }
}

/// Forwards every frontend message unchanged to the backend.
///
/// `zeromq` 0.4 has no XPUB/XSUB, so the frontend subscribes to everything
/// and topic filtering happens on the subscribers' SUB sockets.
pub struct EventProxy {
    config: ProxyConfig,
    metrics: Arc<ProxyMetrics>,
    shutdown: watch::Sender<bool>,
}

impl EventProxy {
    pub fn new(config: ProxyConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            metrics: Arc::new(ProxyMetrics::default()),
            shutdown,
        }
    }

    pub fn metrics(&self) -> &Arc<ProxyMetrics> {
        &self.metrics
    }

    /// Make [`run`](Self::run) return. Safe to call before `run` starts.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Bind all sockets and forward until [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> Result<(), BrokerError> {
        let mut stop = self.shutdown.subscribe();
        if *stop.borrow_and_update() {
            return Ok(());
        }

        for transport in [&self.config.frontend, &self.config.backend, &self.config.health] {
            transport.prepare_bind()?;
        }

        let mut frontend = SubSocket::new();
        frontend.bind(&self.config.frontend.endpoint()).await?;
        frontend.subscribe("").await?;
        let mut backend = PubSocket::new();
        backend.bind(&self.config.backend.endpoint()).await?;
        let mut health = RepSocket::new();
        health.bind(&self.config.health.endpoint()).await?;
        info!(
            frontend = %self.config.frontend,
            backend = %self.config.backend,
            health = %self.config.health,
            "proxy sockets bound"
        );

        let health_task = tokio::spawn(answer_health_checks(health, self.shutdown.subscribe()));

        loop {
            let msg = tokio::select! {
                _ = stop.changed() => break,
                received = frontend.recv() => match received {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(error = %e, "frontend recv failed");
                        if stopped_during(&mut stop, RECV_RETRY_DELAY).await {
                            break;
                        }
                        continue;
                    }
                },
            };

            let topic = topic_of(&msg);
            self.metrics.record(&topic).await;
            debug!(
                topic = %topic,
                bytes = msg.iter().map(|frame| frame.len()).sum::<usize>(),
                total = self.metrics.total(),
                "forwarding"
            );

            if let Err(e) = backend.send(msg).await {
                warn!(topic = %topic, error = %e, "backend send failed");
            }
        }

        if let Err(e) = health_task.await {
            warn!(error = %e, "health task ended abnormally");
        }
        info!(total = self.metrics.total(), "proxy stopped");
        Ok(())
    }
}

/// Reply "ok" to every health check until shutdown.
async fn answer_health_checks(mut socket: RepSocket, mut stop: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            request = socket.recv() => {
                if let Err(e) = request {
                    warn!(error = %e, "health recv failed");
                    if stopped_during(&mut stop, RECV_RETRY_DELAY).await {
                        break;
                    }
                    continue;
                }
                if let Err(e) = socket.send(ZmqMessage::from("ok")).await {
                    warn!(error = %e, "health reply failed");
                }
            }
        }
    }
}

/// Sleep for `delay`, returning early with `true` once shutdown is signalled.
async fn stopped_during(stop: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = stop.changed() => true,
        _ = tokio::time::sleep(delay) => *stop.borrow(),
    }
}

/// First frame as UTF-8, lowercase hex otherwise.
fn topic_of(msg: &ZmqMessage) -> String {
    let Some(frame) = msg.iter().next() else {
        return "<empty>".to_string();
    };
    match std::str::from_utf8(frame) {
        Ok(topic) => topic.to_string(),
        Err(_) => frame.iter().map(|b| format!("{b:02x}")).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_config_uses_prefix() {
        let cfg = ProxyConfig::local("courier");
        assert!(cfg.frontend.endpoint().ends_with("courier-frontend.sock"));
        assert!(cfg.backend.endpoint().ends_with("courier-backend.sock"));
        assert!(cfg.health.endpoint().ends_with("courier-health.sock"));
    }

    #[test]
    fn from_zmq_config_tcp() {
        let cfg = ProxyConfig::from_zmq_config(&ZmqConfig::default()).unwrap();
        assert_eq!(cfg.frontend.endpoint(), "tcp://127.0.0.1:5555");
        assert_eq!(cfg.backend.endpoint(), "tcp://127.0.0.1:5556");
        assert_eq!(cfg.health.endpoint(), "tcp://127.0.0.1:5557");
    }

    #[test]
    fn from_zmq_config_rejects_unknown_transport() {
        let zmq = ZmqConfig {
            transport: "udp".to_string(),
            ..ZmqConfig::default()
        };
        assert!(matches!(
            ProxyConfig::from_zmq_config(&zmq),
            Err(BrokerError::Config(_))
        ));
    }

    #[test]
    fn topic_of_utf8_and_binary_frames() {
        assert_eq!(topic_of(&ZmqMessage::from("my-topic")), "my-topic");
        assert_eq!(topic_of(&ZmqMessage::from(vec![0xde_u8, 0xad])), "dead");
    }

    #[tokio::test]
    async fn metrics_count_per_topic() {
        let metrics = ProxyMetrics::default();
        metrics.record("a").await;
        metrics.record("b").await;
        metrics.record("a").await;

        assert_eq!(metrics.total(), 3);
        assert_eq!(metrics.topic_count("a").await, 2);
        assert_eq!(metrics.topic_count("missing").await, 0);
        assert_eq!(
            metrics.topics().await,
            vec![("a".to_string(), 2), ("b".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn retry_delay_elapses_without_shutdown() {
        let (_tx, mut rx) = watch::channel(false);
        let started = tokio::time::Instant::now();
        assert!(!stopped_during(&mut rx, Duration::from_millis(30)).await);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn retry_delay_is_cut_short_by_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let waiting =
            tokio::spawn(async move { stopped_during(&mut rx, Duration::from_secs(60)).await });
        tx.send_replace(true);
        let stopped = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .expect("shutdown did not interrupt the retry delay")
            .unwrap();
        assert!(stopped);
    }

    #[tokio::test]
    async fn run_after_shutdown_returns_immediately() {
        let proxy = EventProxy::new(ProxyConfig::tcp("127.0.0.1", 17190, 17191, 17192));
        proxy.shutdown();
        assert!(proxy.run().await.is_ok());
    }
}
