//! The chat attached to a session: two bus subscriptions bridged to the
//! frontend stream.
//!
//! A `ChatConnection` owns the presence task (consuming `online.{sender}`)
//! and the intake task (consuming `chat.{sender}`). The intake task feeds
//! a bounded channel, so a slow frontend stalls only the chat subject.
//! The relay itself runs per `Send` call and leaves the chat attached
//! when the frontend goes away.

use std::sync::Arc;

use anyhow::anyhow;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use murmur_core::control;
use murmur_core::wire::{self, ChatMessage, PresenceNotice};
use murmur_core::Address;

use crate::bus::{BusClient, BusSubscription};
use crate::error::{BusError, CombinedError, DaemonError};

/// Channels and tasks wired up at dial time.
///
/// Becomes a [`ChatConnection`] when the handshake succeeds and is
/// aborted when it does not.
pub(crate) struct ChatWiring {
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) presence_task: JoinHandle<Result<(), BusError>>,
    pub(crate) intake_task: JoinHandle<Result<(), BusError>>,
    pub(crate) presence_rx: mpsc::Receiver<bool>,
    pub(crate) incoming_rx: mpsc::Receiver<ChatMessage>,
}

impl ChatWiring {
    /// Spawn the presence and intake tasks over freshly made
    /// subscriptions. The tasks own the subscriptions and unsubscribe on
    /// their way out.
    pub(crate) fn spawn(
        bus: Arc<dyn BusClient>,
        recipient: Address,
        online_sub: Box<dyn BusSubscription>,
        chat_sub: Box<dyn BusSubscription>,
        incoming_buffer: usize,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (presence_tx, presence_rx) = mpsc::channel(1);
        let (incoming_tx, incoming_rx) = mpsc::channel(incoming_buffer);

        let presence_task = tokio::spawn(watch_presence(
            online_sub,
            recipient,
            presence_tx,
            shutdown_rx.clone(),
        ));
        let intake_task = tokio::spawn(intake_chat(chat_sub, incoming_tx, shutdown_rx));

        Self {
            shutdown,
            presence_task,
            intake_task,
            presence_rx,
            incoming_rx,
        }
    }

    /// Unwind a failed dial: stop both tasks, let them unsubscribe. The
    /// remote peer is not notified; no chat ever existed.
    pub(crate) async fn abort(self) {
        let _ = self.shutdown.send(true);
        for task in [self.presence_task, self.intake_task] {
            match task.await {
                Ok(Err(e)) => debug!(error = %e, "dial unwind: unsubscribe failed"),
                Err(e) => debug!(error = %e, "dial unwind: task failed"),
                Ok(Ok(())) => {}
            }
        }
    }
}

/// Consume `online.{sender}` and forward the presence bit of notices
/// authored by the dialed peer. Foreign notices are dropped; redelivery
/// would only repeat them.
async fn watch_presence(
    mut sub: Box<dyn BusSubscription>,
    recipient: Address,
    presence_tx: mpsc::Sender<bool>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BusError> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            delivery = sub.next() => {
                let Some(delivery) = delivery else { break };
                let notice = match PresenceNotice::from_bytes(&delivery.payload) {
                    Ok(notice) => notice,
                    Err(e) => {
                        warn!(error = %e, "dropping unparseable presence notice");
                        continue;
                    }
                };
                if notice.author_address != recipient {
                    debug!(author = %notice.author_address, "ignoring foreign presence notice");
                    continue;
                }
                tokio::select! {
                    _ = shutdown.changed() => break,
                    sent = presence_tx.send(notice.is_online) => {
                        // A dropped receiver only means nobody is watching
                        // presence right now; stay subscribed.
                        if sent.is_err() {
                            trace!("presence bit dropped, no consumer");
                        }
                    }
                }
            }
        }
    }
    sub.unsubscribe().await
}

/// Consume `chat.{sender}` and feed parsed messages into the bounded
/// incoming channel. Waiting for capacity is the back-pressure path.
async fn intake_chat(
    mut sub: Box<dyn BusSubscription>,
    incoming_tx: mpsc::Sender<ChatMessage>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BusError> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            delivery = sub.next() => {
                let Some(delivery) = delivery else { break };
                let msg = match ChatMessage::from_bytes(&delivery.payload) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(error = %e, "dropping unparseable chat message");
                        continue;
                    }
                };
                tokio::select! {
                    _ = shutdown.changed() => break,
                    sent = incoming_tx.send(msg) => {
                        if sent.is_err() {
                            // Receiver gone: the chat is being torn down.
                            break;
                        }
                    }
                }
            }
        }
    }
    sub.unsubscribe().await
}

/// A session-scoped binding to exactly one remote peer.
pub struct ChatConnection {
    sender: Address,
    recipient: Address,
    bus: Arc<dyn BusClient>,
    incoming: Arc<tokio::sync::Mutex<mpsc::Receiver<ChatMessage>>>,
    presence: Option<mpsc::Receiver<bool>>,
    shutdown: watch::Sender<bool>,
    presence_task: Option<JoinHandle<Result<(), BusError>>>,
    intake_task: Option<JoinHandle<Result<(), BusError>>>,
    closed: bool,
}

impl ChatConnection {
    pub(crate) fn new(
        sender: Address,
        recipient: Address,
        bus: Arc<dyn BusClient>,
        wiring: ChatWiring,
    ) -> Self {
        Self {
            sender,
            recipient,
            bus,
            incoming: Arc::new(tokio::sync::Mutex::new(wiring.incoming_rx)),
            presence: Some(wiring.presence_rx),
            shutdown: wiring.shutdown,
            presence_task: Some(wiring.presence_task),
            intake_task: Some(wiring.intake_task),
            closed: false,
        }
    }

    pub fn recipient(&self) -> &Address {
        &self.recipient
    }

    /// The presence stream for this chat's lifetime, if nobody took it
    /// yet. The daemon moves it into its remote-offline watcher.
    pub fn take_presence(&mut self) -> Option<mpsc::Receiver<bool>> {
        self.presence.take()
    }

    /// A cheap handle the relay runs on, so the daemon lock is not held
    /// for the stream's lifetime.
    pub fn relay_handle(&self) -> RelayHandle {
        RelayHandle {
            recipient: self.recipient.clone(),
            bus: self.bus.clone(),
            incoming: self.incoming.clone(),
        }
    }

    /// Tear the chat down: stop intake, tell the peer we are gone,
    /// stop the presence watcher. Every step runs; errors are combined.
    /// Idempotent.
    pub async fn close(&mut self) -> Result<(), DaemonError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut errors = CombinedError::default();
        let _ = self.shutdown.send(true);

        // Intake first: nothing new may enter the incoming channel while
        // the rest unwinds.
        if let Some(task) = self.intake_task.take() {
            join_teardown_task(task, &mut errors).await;
        }

        match (PresenceNotice {
            author_address: self.sender.clone(),
            is_online: false,
        })
        .to_bytes()
        {
            Ok(payload) => {
                let subject = wire::online_subject(&self.recipient);
                if let Err(e) = self.bus.publish(&subject, payload.into()).await {
                    errors.push(e.into());
                } else if let Err(e) = self.bus.flush().await {
                    errors.push(e.into());
                }
            }
            Err(e) => errors.push(DaemonError::Encode(e)),
        }

        if let Some(task) = self.presence_task.take() {
            join_teardown_task(task, &mut errors).await;
        }

        debug!(recipient = %self.recipient, "chat closed");
        errors.into_result()
    }
}

async fn join_teardown_task(
    task: JoinHandle<Result<(), BusError>>,
    errors: &mut CombinedError,
) {
    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => errors.push(e.into()),
        Err(e) => errors.push(DaemonError::Internal(e.into())),
    }
}

/// Everything a relay needs: the publish side of the chat and exclusive
/// access to the incoming channel for the stream's lifetime.
#[derive(Clone)]
pub struct RelayHandle {
    recipient: Address,
    bus: Arc<dyn BusClient>,
    incoming: Arc<tokio::sync::Mutex<mpsc::Receiver<ChatMessage>>>,
}

impl RelayHandle {
    /// Bridge the frontend stream and the bus until the frontend closes
    /// its write half.
    ///
    /// Two concurrent halves: outbound reads chat lines and publishes to
    /// `chat.{recipient}`; inbound drains the incoming channel into the
    /// stream. EOF on the reader ends both cleanly. The chat itself stays
    /// attached whatever the outcome.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<(), DaemonError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut incoming = self
            .incoming
            .clone()
            .try_lock_owned()
            .map_err(|_| DaemonError::InvalidState {
                reason: "a relay is already attached to this chat".into(),
            })?;

        let subject = wire::chat_subject(&self.recipient);
        let (eof_tx, mut eof_rx) = watch::channel(false);

        let outbound = async {
            let mut lines = BufReader::new(reader).lines();
            let result = loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let msg: ChatMessage = match control::from_line(&line) {
                            Ok(msg) => msg,
                            Err(e) => {
                                break Err(DaemonError::Frontend(anyhow!(
                                    "malformed chat frame: {e}"
                                )))
                            }
                        };
                        let payload = match msg.to_bytes() {
                            Ok(payload) => payload,
                            Err(e) => break Err(DaemonError::Encode(e)),
                        };
                        if let Err(e) = self.bus.publish(&subject, payload.into()).await {
                            break Err(e.into());
                        }
                        trace!(time = msg.time, "relayed outbound chat message");
                    }
                    Ok(None) => {
                        debug!("frontend closed its write half");
                        break Ok(());
                    }
                    Err(e) => break Err(DaemonError::Frontend(e.into())),
                }
            };
            let _ = eof_tx.send(true);
            result
        };

        let inbound = async {
            let mut writer = writer;
            loop {
                tokio::select! {
                    _ = eof_rx.changed() => break Ok(()),
                    msg = incoming.recv() => {
                        // None: the chat was torn down under us.
                        let Some(msg) = msg else { break Ok(()) };
                        let line = match control::to_line(&msg) {
                            Ok(line) => line,
                            Err(e) => break Err(DaemonError::Encode(e)),
                        };
                        if let Err(e) = writer.write_all(line.as_bytes()).await {
                            break Err(DaemonError::Frontend(e.into()));
                        }
                        if let Err(e) = writer.flush().await {
                            break Err(DaemonError::Frontend(e.into()));
                        }
                        trace!(time = msg.time, "relayed inbound chat message");
                    }
                }
            }
        };

        let (out_result, in_result) = tokio::join!(outbound, inbound);
        match (out_result, in_result) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Err(first), Err(second)) => {
                Err(DaemonError::Combined(CombinedError(vec![first, second])))
            }
        }
    }
}
