//! Error types for the client runtime

use std::io;

use srcp_protocol::{Address, DeviceGroup, ProtocolError};
use thiserror::Error;

use crate::session::SessionId;

/// Failures of the command channel transport
///
/// All of these are terminal for the channel; it has to be reconnected.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Host name could not be resolved
    #[error("host not found: {0}")]
    HostNotFound(String),

    /// Connect did not complete within the configured timeout
    #[error("connect to {host} timed out after {timeout_ms}ms")]
    Timeout { host: String, timeout_ms: u64 },

    /// I/O failure, premature end of stream, or use after disconnect
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// Error returned when the channel has no transport
    pub fn not_connected() -> Self {
        Self::Io(io::Error::new(io::ErrorKind::NotConnected, "not connected"))
    }
}

/// Violations of the device model, detected before any network call
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Bus or address out of range for the decoder type
    #[error("invalid address {0}")]
    InvalidAddress(Address),

    /// Neither the locomotive nor the control has a session
    #[error("no session attached")]
    NoSession,

    /// The locomotive has no device handle for a command
    #[error("locomotive {0} is not initialized")]
    NotInitialized(Address),

    /// Function vector width does not match the decoder
    #[error("expected {expected} functions, got {actual}")]
    FunctionCount { expected: usize, actual: usize },
}

/// Device lock conflicts
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Device is locked by another session
    #[error("{group} {address} is locked by session {holder}")]
    DeviceLocked {
        group: DeviceGroup,
        address: Address,
        holder: SessionId,
    },
}

/// Any error a device operation can run into
#[derive(Debug, Error)]
pub enum SrcpError {
    /// Transport failure
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Error reply from the server
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Device model violation
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Lock conflict
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl SrcpError {
    /// SRCP status code, where the error carries one
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Protocol(e) => Some(e.code()),
            _ => None,
        }
    }

    /// Returns true if the error means another session controls the device
    pub fn is_locked(&self) -> bool {
        matches!(
            self,
            Self::Lock(LockError::DeviceLocked { .. })
                | Self::Protocol(ProtocolError::DeviceLocked { .. })
        )
    }
}

/// Errors surfaced by [`LocomotiveControl`](crate::LocomotiveControl)
#[derive(Debug, Error)]
pub enum LocomotiveError {
    /// Decoder initialization failed
    #[error("locomotive init failed: {0}")]
    InitFailed(#[source] Box<SrcpError>),

    /// A command failed
    #[error("locomotive command failed: {0}")]
    Failed(#[source] Box<SrcpError>),

    /// The locomotive is locked by another session
    #[error("locomotive is locked: {0}")]
    Locked(#[source] Box<SrcpError>),

    /// The locomotive record is not usable
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl LocomotiveError {
    /// Wrap a device error, mapping lock conflicts to [`LocomotiveError::Locked`]
    pub fn from_command(err: SrcpError) -> Self {
        match err {
            SrcpError::Model(e) => Self::Model(e),
            e if e.is_locked() => Self::Locked(Box::new(e)),
            e => Self::Failed(Box::new(e)),
        }
    }

    /// The underlying device error, if any
    pub fn cause(&self) -> Option<&SrcpError> {
        match self {
            Self::InitFailed(e) | Self::Failed(e) | Self::Locked(e) => Some(e),
            Self::Model(_) => None,
        }
    }
}

impl From<LockError> for LocomotiveError {
    fn from(err: LockError) -> Self {
        Self::Locked(Box::new(SrcpError::Lock(err)))
    }
}

/// Errors loading a [`ClientConfig`](crate::ClientConfig)
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config: {0}")]
    Read(#[from] io::Error),

    /// File is not valid JSON for the config
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
