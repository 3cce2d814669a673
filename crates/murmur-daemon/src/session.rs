//! One "online" period on the bus.
//!
//! A session owns the bus connection and the ping responder: a task that
//! answers every probe on `ping.{sender}` with an `is_online=true` notice
//! to the prober's online subject. The dial handshake also lives here;
//! the subscriptions it opens survive into the returned
//! [`ChatConnection`].

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use murmur_core::wire::{self, PresencePing, PresenceNotice};
use murmur_core::Address;

use crate::bus::{BusClient, BusSubscription};
use crate::chat::{ChatConnection, ChatWiring};
use crate::config::DaemonConfig;
use crate::error::{BusError, CombinedError, DaemonError};

/// The live-on-the-bus state of this peer.
pub struct Session {
    address: Address,
    bus: Arc<dyn BusClient>,
    shutdown: watch::Sender<bool>,
    responder: Option<JoinHandle<Result<(), BusError>>>,
    closed: bool,
}

impl Session {
    /// Go online: subscribe to `ping.{address}` and start answering
    /// probes. The session owns `bus` from here on.
    pub async fn online(bus: Arc<dyn BusClient>, address: Address) -> Result<Self, DaemonError> {
        let subject = wire::ping_subject(&address);
        let sub = bus.subscribe(&subject).await?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let responder = tokio::spawn(respond_to_pings(
            bus.clone(),
            address.clone(),
            sub,
            shutdown_rx,
        ));
        info!(%address, "session online, answering presence probes");
        Ok(Self {
            address,
            bus,
            shutdown,
            responder: Some(responder),
            closed: false,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Dial `recipient`: probe its ping subject at the configured cadence
    /// until it answers on our online subject, then hand back the chat
    /// with both subscriptions attached.
    ///
    /// Only one dial may run per session at a time; a reply of
    /// `is_online=false` or an expired deadline unwinds both
    /// subscriptions and fails with [`DaemonError::RecipientOffline`].
    pub async fn dial(
        &self,
        recipient: Address,
        config: &DaemonConfig,
    ) -> Result<ChatConnection, DaemonError> {
        let online_sub = self
            .bus
            .subscribe(&wire::online_subject(&self.address))
            .await?;
        let chat_sub = match self.bus.subscribe(&wire::chat_subject(&self.address)).await {
            Ok(sub) => sub,
            Err(e) => {
                unwind_subscription(online_sub).await;
                return Err(e.into());
            }
        };

        let mut wiring = ChatWiring::spawn(
            self.bus.clone(),
            recipient.clone(),
            online_sub,
            chat_sub,
            config.incoming_buffer,
        );

        match self.handshake(&recipient, &mut wiring, config).await {
            Ok(()) => {
                debug!(%recipient, "dial succeeded");
                Ok(ChatConnection::new(
                    self.address.clone(),
                    recipient,
                    self.bus.clone(),
                    wiring,
                ))
            }
            Err(e) => {
                wiring.abort().await;
                Err(e)
            }
        }
    }

    /// Ping until the presence channel yields a bit or the deadline
    /// expires.
    async fn handshake(
        &self,
        recipient: &Address,
        wiring: &mut ChatWiring,
        config: &DaemonConfig,
    ) -> Result<(), DaemonError> {
        let probe = PresencePing {
            author_address: self.address.clone(),
        }
        .to_bytes()
        .map_err(DaemonError::Encode)?;
        let subject = wire::ping_subject(recipient);

        let mut ticker = tokio::time::interval(config.ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = config
            .dial_timeout
            .map(|timeout| tokio::time::Instant::now() + timeout);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.bus.publish(&subject, probe.clone().into()).await {
                        debug!(error = %e, "presence probe publish failed");
                    }
                }
                notice = wiring.presence_rx.recv() => match notice {
                    Some(true) => {
                        debug!(%recipient, "recipient answered, online");
                        return Ok(());
                    }
                    Some(false) => return Err(DaemonError::RecipientOffline),
                    // Presence task gone; nothing will ever answer.
                    None => return Err(DaemonError::RecipientOffline),
                },
                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    debug!(%recipient, "dial deadline expired");
                    return Err(DaemonError::RecipientOffline);
                }
            }
        }
    }

    /// Tear the session down: stop the responder, unsubscribe, close the
    /// bus connection. Idempotent. Any chat must be closed first; the
    /// session does not cascade.
    pub async fn close(&mut self) -> Result<(), DaemonError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut errors = CombinedError::default();
        let _ = self.shutdown.send(true);
        if let Some(task) = self.responder.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e.into()),
                Err(e) => errors.push(DaemonError::Internal(e.into())),
            }
        }
        if let Err(e) = self.bus.close().await {
            errors.push(e.into());
        }
        info!(address = %self.address, "session closed");
        errors.into_result()
    }
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending().await,
    }
}

async fn unwind_subscription(mut sub: Box<dyn BusSubscription>) {
    if let Err(e) = sub.unsubscribe().await {
        debug!(error = %e, "unwind unsubscribe failed");
    }
}

/// Answer every presence probe until shut down, then unsubscribe.
///
/// Parse failures are logged and the delivery dropped; retrying a
/// malformed probe cannot help.
async fn respond_to_pings(
    bus: Arc<dyn BusClient>,
    address: Address,
    mut sub: Box<dyn BusSubscription>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BusError> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            delivery = sub.next() => {
                let Some(delivery) = delivery else { break };
                let ping = match PresencePing::from_bytes(&delivery.payload) {
                    Ok(ping) => ping,
                    Err(e) => {
                        warn!(error = %e, "dropping unparseable presence probe");
                        continue;
                    }
                };
                let notice = PresenceNotice {
                    author_address: address.clone(),
                    is_online: true,
                };
                let payload = match notice.to_bytes() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "presence notice encode failed");
                        continue;
                    }
                };
                let subject = wire::online_subject(&ping.author_address);
                if let Err(e) = bus.publish(&subject, payload.into()).await {
                    warn!(error = %e, %subject, "failed to answer presence probe");
                } else {
                    debug!(author = %ping.author_address, "answered presence probe");
                }
            }
        }
    }
    sub.unsubscribe().await
}
