//! Command channel
//!
//! A [`CommandChannel`] owns one duplex line stream to the server. It runs
//! the session handshake and then performs strictly synchronous round
//! trips: write one command line, read exactly one reply line.
//!
//! The channel does not serialize concurrent callers; `send` takes
//! `&mut self`. Share it through [`Session`](crate::Session), which puts it
//! behind an async mutex.
//!
//! Any transport implementing `AsyncRead + AsyncWrite` can be attached, so
//! tests can use `tokio::io::duplex()` instead of a socket.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use srcp_protocol::{decode, EncodeCommand, Reply, SessionCommand};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info, trace};

use crate::config::{ClientConfig, DEFAULT_CONNECT_TIMEOUT_MS};
use crate::error::{ConnectionError, SrcpError};
use crate::events::{CommandData, Listener, ListenerSet};
use crate::session::SessionId;

/// Byte stream the channel runs over
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Synchronous command/reply channel to an SRCP server
pub struct CommandChannel {
    io: Option<BufReader<Box<dyn Transport>>>,
    id: SessionId,
    greeting: Option<String>,
    listeners: Arc<ListenerSet<CommandData>>,
}

impl CommandChannel {
    /// Create a disconnected channel
    pub fn new() -> Self {
        Self {
            io: None,
            id: 0,
            greeting: None,
            listeners: Arc::new(ListenerSet::new()),
        }
    }

    /// Connect over TCP with the default timeout and run the handshake
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<(), SrcpError> {
        let timeout = Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS);
        self.connect_with_timeout(host, port, timeout).await
    }

    /// Connect using a [`ClientConfig`]
    pub async fn connect_with_config(&mut self, config: &ClientConfig) -> Result<(), SrcpError> {
        self.connect_with_timeout(&config.host, config.port, config.connect_timeout())
            .await
    }

    async fn connect_with_timeout(
        &mut self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<(), SrcpError> {
        let connect = async {
            let addrs: Vec<_> = lookup_host((host, port))
                .await
                .map_err(|e| {
                    debug!("Failed to resolve {}: {}", host, e);
                    ConnectionError::HostNotFound(host.to_string())
                })?
                .collect();
            if addrs.is_empty() {
                return Err(ConnectionError::HostNotFound(host.to_string()));
            }
            TcpStream::connect(&addrs[..])
                .await
                .map_err(ConnectionError::from)
        };

        let stream = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| ConnectionError::Timeout {
                host: host.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })??;
        stream.set_nodelay(true).map_err(ConnectionError::from)?;

        info!("Connected to SRCP server {}:{}", host, port);
        self.attach(stream).await
    }

    /// Run the handshake on an already open stream
    ///
    /// Reads the server greeting, switches to command mode and starts the
    /// session. The session id is the fifth token of the `GO` reply; servers
    /// that omit it get id 0.
    pub async fn attach<T>(&mut self, io: T) -> Result<(), SrcpError>
    where
        T: Transport + 'static,
    {
        self.io = Some(BufReader::new(Box::new(io)));
        self.id = 0;
        if let Err(e) = self.handshake().await {
            self.io = None;
            return Err(e);
        }
        Ok(())
    }

    async fn handshake(&mut self) -> Result<(), SrcpError> {
        let io = self.io.as_mut().ok_or_else(ConnectionError::not_connected)?;
        let greeting = read_line(io).await.map_err(ConnectionError::from)?;
        self.listeners.emit(&CommandData::Received(greeting.clone()));
        debug!("Server greeting: {}", greeting);
        self.greeting = Some(greeting);

        self.send(&SessionCommand::CommandMode.encode()).await?;
        let reply = self.send(&SessionCommand::Go.encode()).await?;

        self.id = Reply::token(&reply, 4)
            .and_then(|token| token.parse().ok())
            .unwrap_or(0);
        info!("Command session {} started", self.id);
        Ok(())
    }

    /// Close the transport; closing a closed channel does nothing
    pub async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        if let Some(mut io) = self.io.take() {
            info!("Closing command session {}", self.id);
            io.shutdown().await?;
        }
        Ok(())
    }

    /// Send a command and return the reply, failing if it reports an error
    pub async fn send(&mut self, command: &str) -> Result<String, SrcpError> {
        let reply = self.send_receive(command).await?;
        match decode(command, &reply) {
            Some(err) => {
                debug!("Command {:?} failed: {}", command, err);
                Err(err.into())
            }
            None => Ok(reply),
        }
    }

    /// Send a command and return the raw reply without decoding it
    pub async fn send_receive(&mut self, command: &str) -> Result<String, ConnectionError> {
        let io = self.io.as_mut().ok_or_else(ConnectionError::not_connected)?;

        self.listeners.emit(&CommandData::Sent(command.to_string()));
        trace!("-> {}", command);

        let result = round_trip(io, command).await;
        match result {
            Ok(reply) => {
                trace!("<- {}", reply);
                self.listeners.emit(&CommandData::Received(reply.clone()));
                Ok(reply)
            }
            Err(e) => {
                debug!("Command channel failed, dropping transport: {}", e);
                self.io = None;
                Err(e.into())
            }
        }
    }

    /// Session id assigned by the server (0 until connected)
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns true while a transport is attached
    pub fn is_connected(&self) -> bool {
        self.io.is_some()
    }

    /// Greeting line the server sent on connect
    pub fn greeting(&self) -> Option<&str> {
        self.greeting.as_deref()
    }

    /// Add a command traffic listener
    pub fn add_listener(&self, listener: Arc<dyn Listener<CommandData>>) -> bool {
        self.listeners.add(listener)
    }

    /// Remove a command traffic listener
    pub fn remove_listener(&self, listener: &Arc<dyn Listener<CommandData>>) -> bool {
        self.listeners.remove(listener)
    }

    /// The listener registry shared with the owning session
    pub fn listeners(&self) -> &Arc<ListenerSet<CommandData>> {
        &self.listeners
    }
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .field("greeting", &self.greeting)
            .finish()
    }
}

async fn round_trip(io: &mut BufReader<Box<dyn Transport>>, command: &str) -> io::Result<String> {
    let mut line = String::with_capacity(command.len() + 1);
    line.push_str(command);
    line.push('\n');
    io.write_all(line.as_bytes()).await?;
    io.flush().await?;
    read_line(io).await
}

async fn read_line(io: &mut BufReader<Box<dyn Transport>>) -> io::Result<String> {
    let mut line = String::new();
    let n = io.read_line(&mut line).await?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "server closed the connection",
        ));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
