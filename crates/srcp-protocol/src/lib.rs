//! SRCP Protocol Library
//!
//! This crate provides the wire-level pieces of the SRCP (Simple Railroad
//! Command Protocol) client:
//!
//! - **Commands**: formatting of session, locomotive (GL) and power lines
//! - **Replies**: status code extraction and decoding into [`ProtocolError`]
//! - **Info lines**: parsing of pushed locomotive state into [`InfoEvent`]
//!
//! Nothing here performs I/O. The command channel and the device model live
//! in `srcp-client`.
//!
//! # Example
//!
//! ```rust
//! use srcp_protocol::{decode, Address, Direction, EncodeCommand, GlCommand, ProtocolError};
//!
//! let cmd = GlCommand::Set {
//!     address: Address::new(1, 3),
//!     direction: Direction::Forward,
//!     speed: 5,
//!     max_speed: 14,
//!     functions: vec![false],
//! };
//! let line = cmd.encode();
//! assert_eq!(line, "SET 1 GL 3 1 5 14 0");
//!
//! assert_eq!(decode(&line, "1139428370.120 200 OK"), None);
//! assert!(matches!(
//!     decode(&line, "1139428370.120 412 ERROR wrong value"),
//!     Some(ProtocolError::WrongValue { .. })
//! ));
//! ```

pub mod command;
pub mod error;
pub mod info;
pub mod reply;

pub use command::{Address, Direction, EncodeCommand, GlCommand, PowerCommand, SessionCommand};
pub use error::{ParseError, ProtocolError};
pub use info::InfoEvent;
pub use reply::{decode, Reply};

/// Device groups addressed by SRCP commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceGroup {
    /// Generic locomotive
    Gl,
    /// Generic accessory (turnouts, signals)
    Ga,
    /// Feedback sensors
    Fb,
    /// Track power
    Power,
}

impl DeviceGroup {
    /// Wire name of the group
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceGroup::Gl => "GL",
            DeviceGroup::Ga => "GA",
            DeviceGroup::Fb => "FB",
            DeviceGroup::Power => "POWER",
        }
    }

    /// Parse a wire group name
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "GL" => Some(DeviceGroup::Gl),
            "GA" => Some(DeviceGroup::Ga),
            "FB" => Some(DeviceGroup::Fb),
            "POWER" => Some(DeviceGroup::Power),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
