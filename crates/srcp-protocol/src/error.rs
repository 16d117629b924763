//! Error types for SRCP parsing and reply decoding

use thiserror::Error;

/// Errors that can occur while parsing protocol lines
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Line was empty
    #[error("empty line")]
    Empty,

    /// Line had fewer tokens than the message requires
    #[error("truncated line: {0}")]
    Truncated(String),

    /// A numeric field could not be parsed
    #[error("invalid number {value:?} in {field}")]
    InvalidNumber { field: &'static str, value: String },

    /// Info line for a device group this crate does not model
    #[error("unsupported device group: {0}")]
    UnsupportedGroup(String),

    /// Status code that is not an info message
    #[error("unexpected status code {0}")]
    UnexpectedCode(u16),

    /// Unknown direction token
    #[error("invalid direction: {0}")]
    InvalidDirection(String),
}

/// Errors reported by the server in reply to a command
///
/// Codes 4xx are command errors, 6xx are server side failures. Every variant
/// keeps the text it was decoded from so callers can log it;
/// [`ProtocolError::detached`] drops that context again.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// 410: the server does not know the command
    #[error("410 unknown command: {command}")]
    UnknownCommand { command: String },

    /// 411: a value in the command is not understood
    #[error("411 unknown value: {command}")]
    UnknownValue { command: String },

    /// 412: a value in the command is out of range
    #[error("412 wrong value: {command}")]
    WrongValue { command: String },

    /// 413: the device is busy, the command may be repeated later
    #[error("413 temporarily prohibited: {command}")]
    TemporarilyProhibited { command: String },

    /// 414: the device is locked by another session on the server
    #[error("414 device locked: {command}")]
    DeviceLocked { command: String },

    /// 416: no data available for the requested device
    #[error("416 no data: {command}")]
    NoData { command: String },

    /// 417: the server timed out talking to the hardware
    #[error("417 timeout: {command}")]
    Timeout { command: String },

    /// 418: too many parameters
    #[error("418 list too long: {command}")]
    ListTooLong { command: String },

    /// 419: too few parameters
    #[error("419 list too short: {command}")]
    ListTooShort { command: String },

    /// 420: decoder protocol not supported by the bus
    #[error("420 unsupported device protocol: {command}")]
    UnsupportedDeviceProtocol { command: String },

    /// 421: device not supported by the bus
    #[error("421 unsupported device: {command}")]
    UnsupportedDevice { command: String },

    /// 422: device group not supported by the bus
    #[error("422 unsupported device group: {command}")]
    UnsupportedDeviceGroup { command: String },

    /// 423: operation not supported by the device group
    #[error("423 unsupported operation: {command}")]
    UnsupportedOperation { command: String },

    /// 499, or any reply that could not be classified
    #[error("499 unspecified error: {reply}")]
    UnspecifiedError { reply: String },

    /// 603: I/O failure on the server side
    #[error("603 server io error: {command}")]
    ServerIoError { command: String },
}

impl ProtocolError {
    /// Build the error for a status code, or `None` if the code is not an error
    /// this crate classifies.
    pub fn from_code(code: u16, command: &str, reply: &str) -> Option<Self> {
        let command = command.to_string();
        let err = match code {
            410 => Self::UnknownCommand { command },
            411 => Self::UnknownValue { command },
            412 => Self::WrongValue { command },
            413 => Self::TemporarilyProhibited { command },
            414 => Self::DeviceLocked { command },
            416 => Self::NoData { command },
            417 => Self::Timeout { command },
            418 => Self::ListTooLong { command },
            419 => Self::ListTooShort { command },
            420 => Self::UnsupportedDeviceProtocol { command },
            421 => Self::UnsupportedDevice { command },
            422 => Self::UnsupportedDeviceGroup { command },
            423 => Self::UnsupportedOperation { command },
            499 => Self::UnspecifiedError {
                reply: reply.to_string(),
            },
            603 => Self::ServerIoError { command },
            _ => return None,
        };
        Some(err)
    }

    /// The numeric SRCP status code
    pub fn code(&self) -> u16 {
        match self {
            Self::UnknownCommand { .. } => 410,
            Self::UnknownValue { .. } => 411,
            Self::WrongValue { .. } => 412,
            Self::TemporarilyProhibited { .. } => 413,
            Self::DeviceLocked { .. } => 414,
            Self::NoData { .. } => 416,
            Self::Timeout { .. } => 417,
            Self::ListTooLong { .. } => 418,
            Self::ListTooShort { .. } => 419,
            Self::UnsupportedDeviceProtocol { .. } => 420,
            Self::UnsupportedDevice { .. } => 421,
            Self::UnsupportedDeviceGroup { .. } => 422,
            Self::UnsupportedOperation { .. } => 423,
            Self::UnspecifiedError { .. } => 499,
            Self::ServerIoError { .. } => 603,
        }
    }

    /// Short description as the server phrases it
    pub fn description(&self) -> &'static str {
        match self {
            Self::UnknownCommand { .. } => "unknown command",
            Self::UnknownValue { .. } => "unknown value",
            Self::WrongValue { .. } => "wrong value",
            Self::TemporarilyProhibited { .. } => "temporarily prohibited",
            Self::DeviceLocked { .. } => "device locked",
            Self::NoData { .. } => "no data",
            Self::Timeout { .. } => "timeout",
            Self::ListTooLong { .. } => "list too long",
            Self::ListTooShort { .. } => "list too short",
            Self::UnsupportedDeviceProtocol { .. } => "unsupported device protocol",
            Self::UnsupportedDevice { .. } => "unsupported device",
            Self::UnsupportedDeviceGroup { .. } => "unsupported device group",
            Self::UnsupportedOperation { .. } => "unsupported operation",
            Self::UnspecifiedError { .. } => "unspecified error",
            Self::ServerIoError { .. } => "server io error",
        }
    }

    /// Returns true for 4xx codes (the command was rejected)
    pub fn is_command_error(&self) -> bool {
        (400..500).contains(&self.code())
    }

    /// Returns true for 6xx codes (the server failed)
    pub fn is_server_error(&self) -> bool {
        self.code() >= 600
    }

    /// Returns true if repeating the same command later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TemporarilyProhibited { .. })
    }

    /// The same error without the command or reply it was decoded from
    pub fn detached(&self) -> Self {
        match self {
            Self::UnspecifiedError { .. } => Self::UnspecifiedError {
                reply: String::new(),
            },
            other => Self::from_code(other.code(), "", "").unwrap_or(Self::UnspecifiedError {
                reply: String::new(),
            }),
        }
    }
}
