//! Command line formatting
//!
//! This module builds the text of the commands the client sends on the
//! command channel. Formatting never fails; range checks belong to the
//! caller, which knows the decoder type behind an address.

use std::fmt;

use crate::DeviceGroup;

/// Bus and device address of a decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Address {
    /// Bus number (1-based; 0 is the server itself)
    pub bus: u32,
    /// Decoder address on the bus
    pub address: u32,
}

impl Address {
    /// Create a new address
    pub fn new(bus: u32, address: u32) -> Self {
        Self { bus, address }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bus, self.address)
    }
}

/// Driving direction of a locomotive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// Forward (wire value `1`)
    Forward,
    /// Reverse (wire value `0`)
    Reverse,
    /// Not known yet
    #[default]
    Undef,
}

impl Direction {
    /// Wire token for this direction
    ///
    /// The protocol has no token for an unknown direction, so `Undef` is
    /// sent as forward.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Reverse => "0",
            Self::Forward | Self::Undef => "1",
        }
    }

    /// Parse a wire token (`0` reverse, `1` forward, `2` emergency stop)
    ///
    /// An emergency stop does not tell the direction, so it maps to `Undef`.
    pub fn from_wire(token: &str) -> Option<Self> {
        match token {
            "0" => Some(Self::Reverse),
            "1" => Some(Self::Forward),
            "2" => Some(Self::Undef),
            _ => None,
        }
    }

    /// The opposite direction; an unknown direction becomes reverse
    pub fn toggled(&self) -> Self {
        match self {
            Self::Reverse => Self::Forward,
            Self::Forward | Self::Undef => Self::Reverse,
        }
    }
}

/// Trait for commands that can be encoded to a wire line
pub trait EncodeCommand {
    /// Encode this command without the line terminator
    fn encode(&self) -> String;
}

/// Commands used while opening a command session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Switch the connection into command mode
    CommandMode,
    /// Start the session
    Go,
    /// End the session with the given id
    Term(u32),
}

impl EncodeCommand for SessionCommand {
    fn encode(&self) -> String {
        match self {
            Self::CommandMode => "SET CONNECTIONMODE SRCP COMMAND".to_string(),
            Self::Go => "GO".to_string(),
            Self::Term(id) => format!("TERM 0 SESSION {}", id),
        }
    }
}

/// Generic locomotive (GL) commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlCommand {
    /// Initialize a decoder with a protocol and its parameters
    Init {
        address: Address,
        protocol: String,
        params: Vec<String>,
    },
    /// Set direction, speed and functions
    Set {
        address: Address,
        direction: Direction,
        speed: u32,
        max_speed: u32,
        functions: Vec<bool>,
    },
    /// Query the decoder state
    Get { address: Address },
    /// Release the decoder on the server
    Term { address: Address },
}

impl GlCommand {
    /// Address this command targets
    pub fn address(&self) -> Address {
        match self {
            Self::Init { address, .. }
            | Self::Set { address, .. }
            | Self::Get { address }
            | Self::Term { address } => *address,
        }
    }
}

impl EncodeCommand for GlCommand {
    fn encode(&self) -> String {
        let group = DeviceGroup::Gl.as_str();
        match self {
            Self::Init {
                address,
                protocol,
                params,
            } => {
                let mut line = format!(
                    "INIT {} {} {} {}",
                    address.bus, group, address.address, protocol
                );
                for param in params {
                    line.push(' ');
                    line.push_str(param);
                }
                line
            }
            Self::Set {
                address,
                direction,
                speed,
                max_speed,
                functions,
            } => {
                let mut line = format!(
                    "SET {} {} {} {} {} {}",
                    address.bus,
                    group,
                    address.address,
                    direction.as_wire(),
                    speed,
                    max_speed
                );
                for f in functions {
                    line.push_str(if *f { " 1" } else { " 0" });
                }
                line
            }
            Self::Get { address } => format!("GET {} {} {}", address.bus, group, address.address),
            Self::Term { address } => format!("TERM {} {} {}", address.bus, group, address.address),
        }
    }
}

/// Track power commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerCommand {
    /// Switch power on or off, with optional free text
    Set { bus: u32, on: bool, text: String },
    /// Query power state
    Get { bus: u32 },
    /// Release the power device
    Term { bus: u32 },
}

impl EncodeCommand for PowerCommand {
    fn encode(&self) -> String {
        let group = DeviceGroup::Power.as_str();
        match self {
            Self::Set { bus, on, text } => {
                let state = if *on { "ON" } else { "OFF" };
                if text.is_empty() {
                    format!("SET {} {} {}", bus, group, state)
                } else {
                    format!("SET {} {} {} {}", bus, group, state, text)
                }
            }
            Self::Get { bus } => format!("GET {} {}", bus, group),
            Self::Term { bus } => format!("TERM {} {}", bus, group),
        }
    }
}
