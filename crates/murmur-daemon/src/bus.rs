//! Narrow façade over the pub/sub broker.
//!
//! The daemon only ever needs subscribe, publish, flush and close, so
//! that is the whole trait surface. Delivery is best-effort and
//! at-most-once: ordered within one subject, unordered across subjects.
//! [`NatsBus`] is the production implementation; the in-process
//! [`MemoryBus`](crate::mem::MemoryBus) backs the integration tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use crate::error::BusError;

/// A message delivered on a subscribed subject.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Bytes,
}

/// A live bus connection, safe for concurrent publish and subscribe.
#[async_trait]
pub trait BusClient: Send + Sync + 'static {
    /// Subscribe to a subject. Deliveries on one subject are serialized
    /// and arrive in broker order.
    async fn subscribe(&self, subject: &str) -> Result<Box<dyn BusSubscription>, BusError>;

    /// Publish bytes to a subject. Non-blocking, no delivery guarantee.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;

    /// Push queued outbound messages to the broker.
    async fn flush(&self) -> Result<(), BusError>;

    /// Close the connection. Subscriptions stop delivering afterwards.
    async fn close(&self) -> Result<(), BusError>;
}

/// One active subscription.
#[async_trait]
pub trait BusSubscription: Send {
    /// Next delivery. `None` once unsubscribed or the connection closed.
    async fn next(&mut self) -> Option<BusMessage>;

    /// Stop delivery. Idempotent.
    async fn unsubscribe(&mut self) -> Result<(), BusError>;
}

/// Opens bus connections; the seam between the daemon and a concrete
/// broker.
#[async_trait]
pub trait BusConnector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Arc<dyn BusClient>, BusError>;
}

/// NATS-backed bus client.
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    /// Connect to a NATS server, bounding the whole attempt by `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, BusError> {
        let connect = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url);
        let client = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| BusError::ConnectTimeout {
                url: url.to_string(),
                timeout,
            })?
            .map_err(|e| BusError::Connect {
                url: url.to_string(),
                source: e.into(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BusClient for NatsBus {
    async fn subscribe(&self, subject: &str) -> Result<Box<dyn BusSubscription>, BusError> {
        let inner = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::Subscribe {
                subject: subject.to_string(),
                source: e.into(),
            })?;
        Ok(Box::new(NatsSubscription {
            subject: subject.to_string(),
            inner: Some(inner),
        }))
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| BusError::Publish {
                subject: subject.to_string(),
                source: e.into(),
            })
    }

    async fn flush(&self) -> Result<(), BusError> {
        self.client.flush().await.map_err(|e| BusError::Flush(e.into()))
    }

    async fn close(&self) -> Result<(), BusError> {
        // async-nats tears the TCP connection down when the last clone of
        // the client drops; flushing first bounds what queued output is
        // lost.
        self.flush().await
    }
}

struct NatsSubscription {
    subject: String,
    inner: Option<async_nats::Subscriber>,
}

#[async_trait]
impl BusSubscription for NatsSubscription {
    async fn next(&mut self) -> Option<BusMessage> {
        let sub = self.inner.as_mut()?;
        sub.next().await.map(|msg| BusMessage {
            subject: msg.subject.to_string(),
            payload: msg.payload,
        })
    }

    async fn unsubscribe(&mut self) -> Result<(), BusError> {
        if let Some(mut sub) = self.inner.take() {
            sub.unsubscribe()
                .await
                .map_err(|e| BusError::Unsubscribe {
                    subject: self.subject.clone(),
                    source: e.into(),
                })?;
        }
        Ok(())
    }
}

/// Production connector: opens a [`NatsBus`] per Online.
pub struct NatsConnector {
    timeout: Duration,
}

impl NatsConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl BusConnector for NatsConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn BusClient>, BusError> {
        Ok(Arc::new(NatsBus::connect(url, self.timeout).await?))
    }
}
