//! courier-broker: ZeroMQ PUB/SUB proxy used by the `zmq` broker backend.
//!
//! Forwards records from publishers (SUB frontend) to listeners (PUB backend)
//! and answers liveness checks on a REP health socket.
//!
//! # Usage
//!
//! ```bash
//! # TCP on the default ports (5555 frontend, 5556 backend, 5557 health)
//! courier-broker
//!
//! # Local IPC sockets under /tmp/courier/
//! courier-broker --transport ipc
//!
//! # Via environment variables
//! ZMQ_HOST=0.0.0.0 ZMQ_FRONTEND_PORT=6000 courier-broker
//! ```

use std::sync::Arc;

use clap::Parser;
use courier_broker::proxy::{EventProxy, ProxyConfig};
use courier_core::config::ZmqConfig;
use courier_core::shutdown_signal;

/// ZeroMQ proxy between courier publishers and listeners.
#[derive(Parser, Debug)]
#[command(name = "courier-broker", version, about)]
struct Cli {
    /// Transport type: "tcp" or "ipc".
    #[arg(long, env = "ZMQ_TRANSPORT", default_value = "tcp")]
    transport: String,

    /// TCP host to bind to (only used with --transport tcp).
    #[arg(long, env = "ZMQ_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Frontend port, publishers connect here.
    #[arg(long, env = "ZMQ_FRONTEND_PORT", default_value_t = 5555)]
    frontend_port: u16,

    /// Backend port, listeners connect here.
    #[arg(long, env = "ZMQ_BACKEND_PORT", default_value_t = 5556)]
    backend_port: u16,

    /// Health check port.
    #[arg(long, env = "ZMQ_HEALTH_PORT", default_value_t = 5557)]
    health_port: u16,

    /// IPC socket name prefix (only used with --transport ipc).
    #[arg(long, env = "ZMQ_IPC_PREFIX", default_value = "courier")]
    ipc_prefix: String,

    /// Seconds between metrics log lines (0 = disabled).
    #[arg(long, env = "ZMQ_METRICS_INTERVAL", default_value_t = 30)]
    metrics_interval: u64,
}

impl Cli {
    fn zmq_config(&self) -> ZmqConfig {
        ZmqConfig {
            transport: self.transport.clone(),
            host: self.host.clone(),
            frontend_port: self.frontend_port,
            backend_port: self.backend_port,
            health_port: self.health_port,
            ipc_prefix: self.ipc_prefix.clone(),
            ..ZmqConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    courier_core::config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(?cli, "starting courier-broker");

    let config = ProxyConfig::from_zmq_config(&cli.zmq_config())?;
    let proxy = Arc::new(EventProxy::new(config));

    let proxy_for_signal = proxy.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        proxy_for_signal.shutdown();
    });

    if cli.metrics_interval > 0 {
        let metrics = proxy.metrics().clone();
        let every = std::time::Duration::from_secs(cli.metrics_interval);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let topics = metrics.topics().await;
                tracing::info!(
                    total_messages = metrics.total(),
                    unique_topics = topics.len(),
                    "proxy metrics"
                );
                for (topic, count) in topics {
                    tracing::debug!(topic = %topic, count, "topic stats");
                }
            }
        });
    }

    proxy.run().await?;

    tracing::info!("courier-broker exited cleanly");
    Ok(())
}
