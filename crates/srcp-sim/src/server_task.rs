//! Virtual server connection tasks
//!
//! [`SimServer`] shares one [`VirtualServer`] between any number of
//! connections. Each connection runs [`run_session_task`], which sends the
//! greeting and then answers one reply per received line until the client
//! hangs up or terminates its session.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use srcp_protocol::Address;
use tokio::io::{duplex, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::server::{Connection, GlState, VirtualServer};

/// Buffer size of in-process connections
const DUPLEX_BUFFER: usize = 4096;

/// Handle to a shared virtual server
#[derive(Debug, Clone, Default)]
pub struct SimServer {
    inner: Arc<Mutex<VirtualServer>>,
}

impl SimServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an in-process connection
    ///
    /// Must be called from within a tokio runtime; the server side runs on a
    /// spawned task.
    pub fn connect(&self) -> DuplexStream {
        let (client, server) = duplex(DUPLEX_BUFFER);
        let sim = self.clone();
        tokio::spawn(async move {
            if let Err(e) = run_session_task(server, sim).await {
                warn!("Virtual server connection failed: {}", e);
            }
        });
        client
    }

    /// Accept TCP connections until the listener fails
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        info!("Virtual SRCP server listening on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!("Accepted connection from {}", peer);
            let sim = self.clone();
            tokio::spawn(async move {
                if let Err(e) = run_session_task(stream, sim).await {
                    warn!("Connection from {} failed: {}", peer, e);
                }
            });
        }
    }

    /// Run `f` with exclusive access to the server state
    pub fn with<R>(&self, f: impl FnOnce(&mut VirtualServer) -> R) -> R {
        f(&mut self.lock())
    }

    /// Commands received so far, across all connections
    pub fn commands(&self) -> Vec<String> {
        self.lock().received_commands().to_vec()
    }

    pub fn fail_next(&self, code: u16) {
        self.lock().fail_next(code);
    }

    pub fn init_gl(&self, address: Address, protocol: &str, params: &[&str]) {
        self.lock().init_gl(address, protocol, params);
    }

    pub fn lock_gl(&self, address: Address, session: u32) {
        self.lock().lock_gl(address, session);
    }

    pub fn locomotive(&self, address: Address) -> Option<GlState> {
        self.lock().locomotive(address).cloned()
    }

    pub fn power(&self, bus: u32) -> Option<bool> {
        self.lock().power(bus)
    }

    pub fn take_info(&self) -> Vec<String> {
        self.lock().take_info()
    }

    fn lock(&self) -> MutexGuard<'_, VirtualServer> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Serve one connection
pub async fn run_session_task<S>(stream: S, sim: SimServer) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    let mut conn = Connection::new();

    let greeting = sim.with(|server| server.greeting());
    writer.write_all(format!("{}\n", greeting).as_bytes()).await?;
    writer.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let reply = sim.with(|server| server.process_line(&mut conn, &line));
        debug!("{:?} -> {:?}", line, reply);
        writer.write_all(format!("{}\n", reply).as_bytes()).await?;
        writer.flush().await?;
        if conn.is_closed() {
            break;
        }
    }

    if let Some(session) = conn.session() {
        sim.with(|server| server.close_session(session));
    }
    debug!("Virtual server connection closed");
    Ok(())
}
