//! Info channel messages
//!
//! The server pushes device state changes on a separate info connection.
//! Only the generic locomotive group is modelled here:
//!
//! - `<ts> 100 INFO <bus> GL <addr> <dir> <v> <vmax> <f1> ... <fn>`
//! - `<ts> 101 INFO <bus> GL <addr> <protocol> <params...>`
//! - `<ts> 102 INFO <bus> GL <addr>`

use crate::command::{Address, Direction};
use crate::error::ParseError;
use crate::reply::Reply;
use crate::DeviceGroup;

/// Info code for a state update
pub const INFO_SET: u16 = 100;
/// Info code for a device initialization
pub const INFO_INIT: u16 = 101;
/// Info code for a device termination
pub const INFO_TERM: u16 = 102;

/// A locomotive state push from the info channel
#[derive(Debug, Clone, PartialEq)]
pub enum InfoEvent {
    /// A decoder was initialized on the server
    Init {
        timestamp: f64,
        address: Address,
        protocol: String,
        params: Vec<String>,
    },
    /// A decoder changed state
    Set {
        timestamp: f64,
        address: Address,
        direction: Direction,
        speed: u32,
        max_speed: u32,
        functions: Vec<bool>,
    },
    /// A decoder was released on the server
    Term { timestamp: f64, address: Address },
}

impl InfoEvent {
    /// Parse one info channel line
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let reply = Reply::parse(line).ok_or_else(|| ParseError::Truncated(line.to_string()))?;
        let timestamp = reply
            .timestamp
            .ok_or_else(|| ParseError::Truncated(line.to_string()))?;

        // text: INFO <bus> <group> <addr> ...
        let tokens: Vec<&str> = reply.text.split_whitespace().collect();
        if tokens.len() < 4 || tokens[0] != "INFO" {
            return Err(ParseError::Truncated(line.to_string()));
        }
        if tokens[2] != DeviceGroup::Gl.as_str() {
            return Err(ParseError::UnsupportedGroup(tokens[2].to_string()));
        }

        let address = Address::new(number("bus", tokens[1])?, number("address", tokens[3])?);
        let rest = &tokens[4..];

        match reply.code {
            INFO_SET => {
                if rest.len() < 3 {
                    return Err(ParseError::Truncated(line.to_string()));
                }
                let direction = Direction::from_wire(rest[0])
                    .ok_or_else(|| ParseError::InvalidDirection(rest[0].to_string()))?;
                let functions = rest[3..]
                    .iter()
                    .map(|f| match *f {
                        "0" => Ok(false),
                        "1" => Ok(true),
                        other => Err(ParseError::InvalidNumber {
                            field: "function",
                            value: other.to_string(),
                        }),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Set {
                    timestamp,
                    address,
                    direction,
                    speed: number("speed", rest[1])?,
                    max_speed: number("max speed", rest[2])?,
                    functions,
                })
            }
            INFO_INIT => {
                let (protocol, params) = rest
                    .split_first()
                    .ok_or_else(|| ParseError::Truncated(line.to_string()))?;
                Ok(Self::Init {
                    timestamp,
                    address,
                    protocol: protocol.to_string(),
                    params: params.iter().map(|p| p.to_string()).collect(),
                })
            }
            INFO_TERM => Ok(Self::Term { timestamp, address }),
            other => Err(ParseError::UnexpectedCode(other)),
        }
    }

    /// Server timestamp of the push
    pub fn timestamp(&self) -> f64 {
        match self {
            Self::Init { timestamp, .. } | Self::Set { timestamp, .. } | Self::Term { timestamp, .. } => {
                *timestamp
            }
        }
    }

    /// Address the push refers to
    pub fn address(&self) -> Address {
        match self {
            Self::Init { address, .. } | Self::Set { address, .. } | Self::Term { address, .. } => {
                *address
            }
        }
    }
}

fn number(field: &'static str, token: &str) -> Result<u32, ParseError> {
    token.parse().map_err(|_| ParseError::InvalidNumber {
        field,
        value: token.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set() {
        let event = InfoEvent::parse("1139428370.500 100 INFO 1 GL 3 0 5 14 1 0 0 0 1").unwrap();
        assert_eq!(
            event,
            InfoEvent::Set {
                timestamp: 1139428370.5,
                address: Address::new(1, 3),
                direction: Direction::Reverse,
                speed: 5,
                max_speed: 14,
                functions: vec![true, false, false, false, true],
            }
        );
        assert_eq!(event.address(), Address::new(1, 3));
    }

    #[test]
    fn test_parse_init() {
        let event = InfoEvent::parse("1139428370.100 101 INFO 1 GL 3 M 2 14 5").unwrap();
        assert_eq!(
            event,
            InfoEvent::Init {
                timestamp: 1139428370.1,
                address: Address::new(1, 3),
                protocol: "M".into(),
                params: vec!["2".into(), "14".into(), "5".into()],
            }
        );
    }

    #[test]
    fn test_parse_term() {
        let event = InfoEvent::parse("1139428371.000 102 INFO 1 GL 3\n").unwrap();
        assert_eq!(
            event,
            InfoEvent::Term {
                timestamp: 1139428371.0,
                address: Address::new(1, 3),
            }
        );
        assert_eq!(event.timestamp(), 1139428371.0);
    }

    #[test]
    fn test_other_groups_rejected() {
        assert_eq!(
            InfoEvent::parse("1.0 100 INFO 1 POWER ON"),
            Err(ParseError::UnsupportedGroup("POWER".into()))
        );
    }

    #[test]
    fn test_malformed_lines() {
        assert_eq!(InfoEvent::parse(""), Err(ParseError::Empty));
        assert!(InfoEvent::parse("100 INFO 1 GL 3 1 5 14").is_err());
        assert!(InfoEvent::parse("1.0 100 INFO 1 GL x 1 5 14").is_err());
        assert!(InfoEvent::parse("1.0 100 INFO 1 GL 3 9 5 14").is_err());
        assert_eq!(
            InfoEvent::parse("1.0 200 INFO 1 GL 3"),
            Err(ParseError::UnexpectedCode(200))
        );
    }
}
