//! HTTP server lifecycle with an optional in-process listener.

use std::future::Future;

use anyhow::Context;
use axum::Router;
use tracing::{error, info};

use courier_messaging::{Listener, ListenerStats};

/// Serve `app` on `addr` until `shutdown` resolves.
///
/// An in-process `listener` is stopped before returning, also when binding
/// or serving fails. Returns its final counters.
pub async fn serve_with_listener(
    app: Router,
    addr: &str,
    listener: Option<Listener>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<Option<ListenerStats>> {
    let served = serve_http(app, addr, shutdown).await;

    let mut stats = None;
    let mut stop_error = None;
    if let Some(mut listener) = listener {
        match listener.stop().await {
            Ok(drained) => {
                info!(processed = drained.processed, failed = drained.failed, "Listener drained");
                stats = Some(drained);
            }
            Err(e) => {
                error!(error = %e, "Listener did not stop cleanly");
                stop_error = Some(e);
            }
        }
    }

    served?;
    if let Some(e) = stop_error {
        return Err(e.into());
    }
    Ok(stats)
}

async fn serve_http(
    app: Router,
    addr: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let tcp = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", tcp.local_addr()?);
    axum::serve(tcp, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}
