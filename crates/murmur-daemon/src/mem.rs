//! In-process bus.
//!
//! A subject router with the same delivery contract as the real broker:
//! best-effort, at-most-once, FIFO per subject, unordered across
//! subjects. Each [`MemoryBus::connect`] hands out an independent
//! connection whose close only drops its own subscriptions, so several
//! daemons can share one broker the way they share one NATS server.
//! Used by the integration tests; no broker binary needed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::bus::{BusClient, BusConnector, BusMessage, BusSubscription};
use crate::error::BusError;

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    subscriptions: HashMap<String, Vec<Entry>>,
}

struct Entry {
    id: u64,
    conn: u64,
    tx: mpsc::UnboundedSender<BusMessage>,
}

/// The shared broker. Cheap to clone; all clones route to the same
/// subscriptions.
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection to this broker.
    pub fn connect(&self) -> MemoryConn {
        let conn = {
            let mut state = self.state.lock().expect("broker lock poisoned");
            state.next_id += 1;
            state.next_id
        };
        MemoryConn {
            bus: self.clone(),
            conn,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live subscriptions across all connections.
    pub fn subscription_count(&self) -> usize {
        let state = self.state.lock().expect("broker lock poisoned");
        state.subscriptions.values().map(Vec::len).sum()
    }

    fn deliver(&self, subject: &str, payload: &Bytes) {
        let mut state = self.state.lock().expect("broker lock poisoned");
        if let Some(entries) = state.subscriptions.get_mut(subject) {
            entries.retain(|entry| {
                entry
                    .tx
                    .send(BusMessage {
                        subject: subject.to_string(),
                        payload: payload.clone(),
                    })
                    .is_ok()
            });
        }
    }

    fn remove_subscription(&self, subject: &str, id: u64) {
        let mut state = self.state.lock().expect("broker lock poisoned");
        if let Some(entries) = state.subscriptions.get_mut(subject) {
            entries.retain(|entry| entry.id != id);
        }
        if state.subscriptions.get(subject).is_some_and(Vec::is_empty) {
            state.subscriptions.remove(subject);
        }
    }

    fn remove_connection(&self, conn: u64) {
        let mut state = self.state.lock().expect("broker lock poisoned");
        state
            .subscriptions
            .retain(|_, entries| {
                entries.retain(|entry| entry.conn != conn);
                !entries.is_empty()
            });
    }
}

/// One connection to a [`MemoryBus`].
pub struct MemoryConn {
    bus: MemoryBus,
    conn: u64,
    closed: AtomicBool,
}

#[async_trait]
impl BusClient for MemoryConn {
    async fn subscribe(&self, subject: &str) -> Result<Box<dyn BusSubscription>, BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.bus.state.lock().expect("broker lock poisoned");
            state.next_id += 1;
            let id = state.next_id;
            state
                .subscriptions
                .entry(subject.to_string())
                .or_default()
                .push(Entry {
                    id,
                    conn: self.conn,
                    tx,
                });
            id
        };
        Ok(Box::new(MemorySubscription {
            bus: self.bus.clone(),
            subject: subject.to_string(),
            id,
            rx,
        }))
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        self.bus.deliver(subject, &payload);
        Ok(())
    }

    async fn flush(&self) -> Result<(), BusError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.bus.remove_connection(self.conn);
        }
        Ok(())
    }
}

struct MemorySubscription {
    bus: MemoryBus,
    subject: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

#[async_trait]
impl BusSubscription for MemorySubscription {
    async fn next(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    async fn unsubscribe(&mut self) -> Result<(), BusError> {
        self.bus.remove_subscription(&self.subject, self.id);
        Ok(())
    }
}

/// Connector handing every Online the same in-process broker. The URL is
/// accepted and ignored.
pub struct MemoryConnector {
    bus: MemoryBus,
}

impl MemoryConnector {
    pub fn new(bus: MemoryBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl BusConnector for MemoryConnector {
    async fn connect(&self, _url: &str) -> Result<Arc<dyn BusClient>, BusError> {
        Ok(Arc::new(self.bus.connect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_every_subscriber_in_order() {
        let bus = MemoryBus::new();
        let conn_a = bus.connect();
        let conn_b = bus.connect();

        let mut sub_a = conn_a.subscribe("chat.x").await.unwrap();
        let mut sub_b = conn_b.subscribe("chat.x").await.unwrap();

        for n in 0..3u8 {
            conn_a
                .publish("chat.x", Bytes::copy_from_slice(&[n]))
                .await
                .unwrap();
        }

        for sub in [&mut sub_a, &mut sub_b] {
            for n in 0..3u8 {
                let msg = sub.next().await.unwrap();
                assert_eq!(msg.payload.as_ref(), &[n]);
            }
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let bus = MemoryBus::new();
        let conn = bus.connect();
        conn.publish("nowhere", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn close_drops_only_this_connections_subscriptions() {
        let bus = MemoryBus::new();
        let conn_a = bus.connect();
        let conn_b = bus.connect();

        let mut sub_a = conn_a.subscribe("ping.a").await.unwrap();
        let _sub_b = conn_b.subscribe("ping.b").await.unwrap();
        assert_eq!(bus.subscription_count(), 2);

        conn_a.close().await.unwrap();
        assert_eq!(bus.subscription_count(), 1);
        assert!(sub_a.next().await.is_none());
        assert!(matches!(
            conn_a.publish("ping.b", Bytes::new()).await,
            Err(BusError::Closed)
        ));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = MemoryBus::new();
        let conn = bus.connect();
        let mut sub = conn.subscribe("online.a").await.unwrap();
        sub.unsubscribe().await.unwrap();
        assert_eq!(bus.subscription_count(), 0);
        conn.publish("online.a", Bytes::new()).await.unwrap();
        assert!(sub.next().await.is_none());
    }
}
