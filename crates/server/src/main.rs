use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use courier_broker::BrokerClient;
use courier_core::{shutdown_signal, BrokerBackend, Config};
use courier_messaging::{Listener, LoggingHandler, Publisher};
use courier_server::cli::{Cli, Command};
use courier_server::{build_router, serve_with_listener, AppState};

fn load_config(profile: Option<&str>) -> anyhow::Result<Config> {
    let config = match profile {
        Some(p) => Config::for_profile(p)?,
        None => Config::from_env()?,
    };
    Ok(config)
}

fn logging_listener(config: &Config, broker: &Arc<dyn BrokerClient>) -> Listener {
    Listener::new(
        broker.clone(),
        config.messaging.clone(),
        Arc::new(LoggingHandler),
    )
}

async fn serve(
    config: &Config,
    broker: Arc<dyn BrokerClient>,
    with_listener: bool,
) -> anyhow::Result<()> {
    let mut listener = None;
    if with_listener {
        let mut l = logging_listener(config, &broker);
        l.start().await?;
        listener = Some(l);
    } else if config.broker.backend == BrokerBackend::Memory {
        warn!("memory broker without --with-listener: published messages are never consumed");
    }

    let publisher = Publisher::new(broker.clone(), &config.messaging);
    let mut state = AppState::new(publisher, broker.name(), config.messaging.clone());
    if let Some(l) = &listener {
        state = state.with_listener(l.watch_state());
    }
    let app = build_router(Arc::new(state), &config.server.cors_origin);

    serve_with_listener(app, &config.server.bind_addr(), listener, shutdown_signal()).await?;
    Ok(())
}

async fn listen(config: &Config, broker: Arc<dyn BrokerClient>) -> anyhow::Result<()> {
    if config.broker.backend == BrokerBackend::Memory {
        warn!("memory broker in a listen-only process: nothing can publish to it");
    }

    let mut listener = logging_listener(config, &broker);
    listener.start().await?;
    shutdown_signal().await;

    let stats = listener.stop().await?;
    info!(processed = stats.processed, failed = stats.failed, "Listener drained");
    Ok(())
}

async fn send(
    config: &Config,
    broker: Arc<dyn BrokerClient>,
    key: &str,
    payload: &str,
) -> anyhow::Result<()> {
    let publisher = Publisher::new(broker, &config.messaging);
    let ack = publisher.send(key, payload.as_bytes()).await?;
    println!(
        "{} (topic={}, partition={:?}, offset={:?})",
        courier_server::api::messages::SUCCESS_MESSAGE,
        ack.topic,
        ack.partition,
        ack.offset
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    courier_core::config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.profile.as_deref())?;
    config.log_summary();

    let broker = courier_broker::connect(&config.broker).await?;

    let result = match cli.command {
        Command::Serve { with_listener } => serve(&config, broker.clone(), with_listener).await,
        Command::Listen => listen(&config, broker.clone()).await,
        Command::Send { key, payload } => send(&config, broker.clone(), &key, &payload).await,
    };

    if let Err(e) = broker.shutdown().await {
        warn!(error = %e, "broker shutdown failed");
    }
    result
}
