//! The daemon control surface.
//!
//! States: Down, Up without a chat, Up with a chat. Control calls drive
//! the transitions; anything else is a state-machine error with no side
//! effects. A single async mutex serialises all mutations, so the
//! transitions are atomic. `Send` is the only long-lived call and runs
//! off a cloned handle, outside the lock.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use murmur_core::Address;

use crate::bus::{BusConnector, NatsConnector};
use crate::chat::{ChatConnection, RelayHandle};
use crate::config::DaemonConfig;
use crate::error::{CombinedError, DaemonError};
use crate::session::Session;

#[derive(Default)]
struct DaemonState {
    session: Option<Session>,
    chat: Option<ChatConnection>,
    /// Bumped per chat so the remote-offline watcher never closes a
    /// newer chat than the one it was spawned for.
    chat_epoch: u64,
}

/// Singleton owner of the current [`Session`] and [`ChatConnection`].
pub struct Daemon {
    config: DaemonConfig,
    connector: Box<dyn BusConnector>,
    state: Mutex<DaemonState>,
}

impl Daemon {
    /// A daemon that connects to real NATS servers.
    pub fn new(config: DaemonConfig) -> Self {
        let connector = Box::new(NatsConnector::new(config.connect_timeout));
        Self::with_connector(config, connector)
    }

    /// A daemon over any bus implementation; the tests hand in the
    /// in-process broker here.
    pub fn with_connector(config: DaemonConfig, connector: Box<dyn BusConnector>) -> Self {
        Self {
            config,
            connector,
            state: Mutex::new(DaemonState::default()),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Down → Up(no chat). Connects to the bus and starts the session.
    pub async fn online(&self, nats_url: &str, sender_address: Address) -> Result<(), DaemonError> {
        let mut state = self.state.lock().await;
        if state.session.is_some() {
            return Err(DaemonError::AlreadyOnline);
        }
        let bus = self.connector.connect(nats_url).await?;
        let session = match Session::online(bus.clone(), sender_address).await {
            Ok(session) => session,
            Err(e) => {
                // Unwind the half-built state; a failed Online leaves Down.
                let _ = bus.close().await;
                return Err(e);
            }
        };
        state.session = Some(session);
        Ok(())
    }

    /// Up(\*) → Down. Closes the chat (if any), then the session. No-op
    /// when already Down; teardown errors are combined.
    pub async fn offline(&self) -> Result<(), DaemonError> {
        let mut state = self.state.lock().await;
        let mut errors = CombinedError::default();
        if let Some(mut chat) = state.chat.take() {
            if let Err(e) = chat.close().await {
                errors.push(e);
            }
        }
        if let Some(mut session) = state.session.take() {
            if let Err(e) = session.close().await {
                errors.push(e);
            }
        }
        errors.into_result()
    }

    /// Up(no chat) → Up(chat). Dials the recipient and attaches the chat.
    pub async fn create_chat(self: &Arc<Self>, recipient: Address) -> Result<(), DaemonError> {
        let mut state = self.state.lock().await;
        let Some(session) = state.session.as_ref() else {
            return Err(DaemonError::InvalidState {
                reason: "not online".into(),
            });
        };
        if state.chat.is_some() {
            return Err(DaemonError::ChatExists);
        }
        if session.address() == &recipient {
            // A peer never publishes to its own subjects.
            return Err(DaemonError::InvalidState {
                reason: "cannot dial own address".into(),
            });
        }

        let mut chat = session.dial(recipient.clone(), &self.config).await?;
        let presence = chat.take_presence();
        state.chat = Some(chat);
        state.chat_epoch += 1;
        let epoch = state.chat_epoch;
        drop(state);

        if let Some(presence) = presence {
            tokio::spawn(watch_remote(self.clone(), presence, epoch, recipient));
        }
        Ok(())
    }

    /// Up(chat) → Up(no chat). No-op without a chat.
    pub async fn delete_chat(&self, _recipient: &Address) -> Result<(), DaemonError> {
        let mut state = self.state.lock().await;
        match state.chat.take() {
            Some(mut chat) => chat.close().await,
            None => Ok(()),
        }
    }

    /// The relay handle for the current chat, or `NoChat`.
    pub async fn relay_handle(&self) -> Result<RelayHandle, DaemonError> {
        let state = self.state.lock().await;
        Ok(state
            .chat
            .as_ref()
            .ok_or(DaemonError::NoChat)?
            .relay_handle())
    }

    /// Run the chat relay over a frontend stream until it closes. The
    /// chat stays attached afterwards, error or not.
    pub async fn send<R, W>(&self, reader: R, writer: W) -> Result<(), DaemonError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let handle = self.relay_handle().await?;
        handle.run(reader, writer).await
    }

    /// Signal-time teardown: Offline semantics, best-effort.
    pub async fn shutdown(&self) {
        if let Err(e) = self.offline().await {
            warn!(error = %e, "shutdown teardown reported errors");
        }
    }

    async fn close_chat_if_current(&self, epoch: u64) {
        let mut state = self.state.lock().await;
        if state.chat_epoch != epoch {
            return;
        }
        if let Some(mut chat) = state.chat.take() {
            if let Err(e) = chat.close().await {
                warn!(error = %e, "closing chat after remote went offline");
            }
        }
    }
}

/// Watch the chat's presence stream; an `is_online=false` notice from
/// the peer closes the chat on our side too.
async fn watch_remote(
    daemon: Arc<Daemon>,
    mut presence: mpsc::Receiver<bool>,
    epoch: u64,
    recipient: Address,
) {
    while let Some(is_online) = presence.recv().await {
        if !is_online {
            info!(%recipient, "remote peer went offline, closing chat");
            daemon.close_chat_if_current(epoch).await;
            return;
        }
    }
}
