//! Device handles
//!
//! Thin handles that bind a device to a session and send its commands.
//! They hold no state beyond their address.

use std::sync::Arc;

use srcp_protocol::{decode, Address, Direction, EncodeCommand, GlCommand, PowerCommand};
use tracing::debug;

use crate::error::SrcpError;
use crate::session::Session;

/// Handle for one locomotive decoder
#[derive(Debug, Clone)]
pub struct GlDevice {
    session: Arc<Session>,
    address: Address,
}

impl GlDevice {
    /// Bind a decoder address to a session
    pub fn new(session: Arc<Session>, address: Address) -> Self {
        Self { session, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// `INIT <bus> GL <addr> <protocol> <params...>`
    pub async fn init(&self, protocol: &str, params: &[&str]) -> Result<String, SrcpError> {
        let cmd = GlCommand::Init {
            address: self.address,
            protocol: protocol.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
        };
        self.session.send(&cmd.encode()).await
    }

    /// `SET <bus> GL <addr> <dir> <v> <vmax> <f...>`
    ///
    /// A blank reply is an acknowledgement without a timestamp and comes
    /// back as an empty string.
    pub async fn set(
        &self,
        direction: Direction,
        speed: u32,
        max_speed: u32,
        functions: &[bool],
    ) -> Result<String, SrcpError> {
        let cmd = GlCommand::Set {
            address: self.address,
            direction,
            speed,
            max_speed,
            functions: functions.to_vec(),
        };
        let command = cmd.encode();
        let reply = self.session.send_receive(&command).await?;
        if reply.trim().is_empty() {
            debug!("Empty acknowledgement for {:?}", command);
            return Ok(String::new());
        }
        match decode(&command, &reply) {
            Some(err) => Err(err.into()),
            None => Ok(reply),
        }
    }

    /// `GET <bus> GL <addr>`
    pub async fn get(&self) -> Result<String, SrcpError> {
        let cmd = GlCommand::Get {
            address: self.address,
        };
        self.session.send(&cmd.encode()).await
    }

    /// `TERM <bus> GL <addr>`
    pub async fn term(&self) -> Result<String, SrcpError> {
        let cmd = GlCommand::Term {
            address: self.address,
        };
        self.session.send(&cmd.encode()).await
    }
}

/// Handle for the track power of one bus
#[derive(Debug, Clone)]
pub struct PowerDevice {
    session: Arc<Session>,
    bus: u32,
}

impl PowerDevice {
    pub fn new(session: Arc<Session>, bus: u32) -> Self {
        Self { session, bus }
    }

    pub fn bus(&self) -> u32 {
        self.bus
    }

    /// Switch track power, with optional free text for other clients
    pub async fn set(&self, on: bool, text: &str) -> Result<String, SrcpError> {
        let cmd = PowerCommand::Set {
            bus: self.bus,
            on,
            text: text.to_string(),
        };
        self.session.send(&cmd.encode()).await
    }

    pub async fn get(&self) -> Result<String, SrcpError> {
        self.session
            .send(&PowerCommand::Get { bus: self.bus }.encode())
            .await
    }

    pub async fn term(&self) -> Result<String, SrcpError> {
        self.session
            .send(&PowerCommand::Term { bus: self.bus }.encode())
            .await
    }
}
