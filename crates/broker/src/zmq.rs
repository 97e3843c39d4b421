//! ZeroMQ PUB/SUB client for the courier proxy.
//!
//! Records are sent as two-frame ZMQ messages:
//! 1. Topic string (used by SUB sockets for prefix filtering)
//! 2. MessagePack-encoded [`Envelope`]
//!
//! PUB/SUB is fan-out, so every subscription receives every record on its
//! topic. The consumer group id is kept for logging only and offsets are not
//! tracked.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use zeromq::prelude::*;
use zeromq::{PubSocket, ReqSocket, SubSocket, ZmqError, ZmqMessage};

use courier_core::config::ZmqConfig;
use courier_core::{OffsetReset, PublishAck, Record};

use crate::envelope::Envelope;
use crate::error::BrokerError;
use crate::proxy::ProxyConfig;
use crate::traits::{BrokerClient, Subscription};
use crate::transport::Transport;

/// Time for the proxy's SUB socket to send its subscription to a freshly
/// connected PUB socket. Records published before that are dropped.
const PUBLISHER_SETTLE: Duration = Duration::from_millis(200);

/// [`BrokerClient`] backed by the ZeroMQ proxy.
///
/// Publishing goes through one shared PUB socket connected to the proxy
/// frontend; each subscription opens its own SUB socket on the backend.
/// PUB sockets never report a missing peer, so every publish first
/// round-trips a request to the proxy's health socket.
pub struct ZmqBroker {
    sockets: ProxyConfig,
    connect_timeout: Duration,
    /// Dropped after a failed health check and reconnected on the next publish.
    publisher: Mutex<Option<PubSocket>>,
    health: Mutex<Option<ReqSocket>>,
}

impl ZmqBroker {
    /// Connect the publishing side to the proxy frontend. Fails with
    /// [`BrokerError::Timeout`] when nothing answers within `connect_timeout`.
    #[instrument(skip_all, fields(frontend = %sockets.frontend, backend = %sockets.backend))]
    pub async fn connect(
        sockets: ProxyConfig,
        connect_timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let publisher = connect_publisher(&sockets.frontend, connect_timeout).await?;
        Ok(Self {
            sockets,
            connect_timeout,
            publisher: Mutex::new(Some(publisher)),
            health: Mutex::new(None),
        })
    }

    pub async fn from_config(config: &ZmqConfig) -> Result<Self, BrokerError> {
        let sockets = ProxyConfig::from_zmq_config(config)?;
        Self::connect(sockets, config.connect_timeout()).await
    }

    /// Round-trip a request to the proxy health socket.
    async fn check_proxy(&self) -> Result<(), BrokerError> {
        let mut slot = self.health.lock().await;
        let mut socket = match slot.take() {
            Some(socket) => socket,
            None => {
                let mut socket = ReqSocket::new();
                connect_within(&mut socket, &self.sockets.health, self.connect_timeout).await?;
                socket
            }
        };

        let reply = timeout(self.connect_timeout, ping(&mut socket)).await;
        match reply {
            Ok(Ok(_)) => {
                *slot = Some(socket);
                Ok(())
            }
            Ok(Err(e)) => Err(BrokerError::Connection(format!(
                "proxy health check on {} failed: {e}",
                self.sockets.health
            ))),
            Err(_) => Err(BrokerError::Timeout(self.connect_timeout)),
        }
    }
}

async fn ping(socket: &mut ReqSocket) -> Result<ZmqMessage, ZmqError> {
    socket.send(ZmqMessage::from("ping")).await?;
    socket.recv().await
}

/// `Socket::connect` retries forever while nothing listens on the endpoint.
async fn connect_within<S: Socket>(
    socket: &mut S,
    transport: &Transport,
    limit: Duration,
) -> Result<(), BrokerError> {
    let endpoint = transport.endpoint();
    match timeout(limit, socket.connect(&endpoint)).await {
        Ok(connected) => Ok(connected?),
        Err(_) => {
            warn!(endpoint = %endpoint, timeout = ?limit, "proxy endpoint not reachable");
            Err(BrokerError::Timeout(limit))
        }
    }
}

async fn connect_publisher(frontend: &Transport, limit: Duration) -> Result<PubSocket, BrokerError> {
    let mut socket = PubSocket::new();
    info!(endpoint = %frontend, "connecting PUB socket to proxy frontend");
    connect_within(&mut socket, frontend, limit).await?;
    tokio::time::sleep(PUBLISHER_SETTLE).await;
    Ok(socket)
}

#[async_trait]
impl BrokerClient for ZmqBroker {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<PublishAck, BrokerError> {
        if let Err(e) = self.check_proxy().await {
            // A restarted proxy needs a fresh PUB connection.
            self.publisher.lock().await.take();
            warn!(topic, error = %e, "proxy unavailable, record not sent");
            return Err(e);
        }

        let envelope = Envelope::new(topic, key, payload);
        let id = envelope.id;
        let bytes = envelope.to_bytes()?;

        let mut zmq_msg = ZmqMessage::from(topic);
        zmq_msg.push_back(bytes.into());

        let mut publisher = self.publisher.lock().await;
        let mut socket = match publisher.take() {
            Some(socket) => socket,
            None => connect_publisher(&self.sockets.frontend, self.connect_timeout).await?,
        };
        socket.send(zmq_msg).await?;
        *publisher = Some(socket);

        debug!(topic, key, id = %id, "published record");
        Ok(PublishAck::unpositioned(topic))
    }

    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        _offset_reset: OffsetReset,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let mut socket = SubSocket::new();
        connect_within(&mut socket, &self.sockets.backend, self.connect_timeout).await?;
        socket.subscribe(topic).await?;

        info!(
            endpoint = %self.sockets.backend,
            topic,
            group_id,
            "subscribed SUB socket (fan-out, group not enforced)"
        );
        Ok(Box::new(ZmqSubscription {
            socket: Some(socket),
            topic: topic.to_string(),
        }))
    }

    fn name(&self) -> &'static str {
        "zmq"
    }
}

struct ZmqSubscription {
    socket: Option<SubSocket>,
    topic: String,
}

#[async_trait]
impl Subscription for ZmqSubscription {
    async fn next_record(&mut self) -> Result<Option<Record>, BrokerError> {
        let Some(socket) = self.socket.as_mut() else {
            return Ok(None);
        };

        loop {
            let zmq_msg = socket.recv().await?;
            let envelope = decode_frames(&zmq_msg)?;

            // SUB filtering is by prefix: "orders" also matches "orders-dlq".
            if envelope.topic != self.topic {
                continue;
            }
            debug!(topic = %envelope.topic, id = %envelope.id, "received record");
            return Ok(Some(envelope.into_record()));
        }
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if self.socket.take().is_some() {
            debug!(topic = %self.topic, "closed SUB socket");
        }
        Ok(())
    }
}

/// Decode a `[topic, envelope]` message. A single frame is treated as the
/// envelope itself.
fn decode_frames(msg: &ZmqMessage) -> Result<Envelope, BrokerError> {
    let frames: Vec<_> = msg.iter().collect();
    let envelope_bytes: &[u8] = match frames.as_slice() {
        [_, envelope, ..] => envelope.as_ref(),
        [single] => {
            warn!("received single-frame message");
            single.as_ref()
        }
        [] => return Err(BrokerError::Transport("empty ZMQ message".into())),
    };
    Ok(Envelope::from_bytes(envelope_bytes)?)
}
