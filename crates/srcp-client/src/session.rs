//! Shared command session
//!
//! A [`Session`] owns a connected [`CommandChannel`] behind an async mutex,
//! so device handles on many tasks can share it while every round trip
//! still reads its own reply.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::channel::{CommandChannel, Transport};
use crate::config::ClientConfig;
use crate::error::{ConnectionError, SrcpError};
use crate::events::{CommandData, ListenerSet};

/// Server-assigned session id
pub type SessionId = u32;

/// One connected command session
pub struct Session {
    id: SessionId,
    channel: Mutex<CommandChannel>,
    listeners: Arc<ListenerSet<CommandData>>,
}

impl Session {
    /// Connect to the server described by `config`
    pub async fn connect(config: &ClientConfig) -> Result<Arc<Self>, SrcpError> {
        let mut channel = CommandChannel::new();
        channel.connect_with_config(config).await?;
        Ok(Self::from_channel(channel))
    }

    /// Start a session over an already open stream
    pub async fn attach<T>(io: T) -> Result<Arc<Self>, SrcpError>
    where
        T: Transport + 'static,
    {
        let mut channel = CommandChannel::new();
        channel.attach(io).await?;
        Ok(Self::from_channel(channel))
    }

    /// Wrap a channel that has completed its handshake
    pub fn from_channel(channel: CommandChannel) -> Arc<Self> {
        Arc::new(Self {
            id: channel.id(),
            listeners: channel.listeners().clone(),
            channel: Mutex::new(channel),
        })
    }

    /// Session id assigned by the server
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Send a command, waiting for any round trip already in flight
    pub async fn send(&self, command: &str) -> Result<String, SrcpError> {
        let mut channel = self.channel.lock().await;
        channel.send(command).await
    }

    /// Send a command and return the raw reply without decoding it
    pub async fn send_receive(&self, command: &str) -> Result<String, ConnectionError> {
        let mut channel = self.channel.lock().await;
        channel.send_receive(command).await
    }

    /// Close the channel
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        debug!("Disconnecting session {}", self.id);
        self.channel.lock().await.disconnect().await
    }

    /// Returns true while the channel has a transport
    pub async fn is_connected(&self) -> bool {
        self.channel.lock().await.is_connected()
    }

    /// Command traffic listeners of the underlying channel
    pub fn command_listeners(&self) -> &ListenerSet<CommandData> {
        &self.listeners
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}
