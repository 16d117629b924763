//! Reply decoding
//!
//! Replies on the command channel look like
//! `1139428370.120 200 OK` or, on older servers, `200 OK`. The status code
//! is the first token made of exactly three digits.

use tracing::debug;

use crate::error::ProtocolError;

/// A parsed server reply
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Server timestamp (seconds), if the reply carries one
    pub timestamp: Option<f64>,
    /// Three digit status code
    pub code: u16,
    /// Everything after the status code
    pub text: String,
}

impl Reply {
    /// Parse a reply line, or `None` if it has no status code
    pub fn parse(line: &str) -> Option<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let code_index = tokens.iter().position(|t| is_status_code(t))?;
        let code = tokens[code_index].parse().ok()?;

        let timestamp = if code_index > 0 {
            tokens[0].parse::<f64>().ok().filter(|t| t.is_finite())
        } else {
            None
        };

        Some(Self {
            timestamp,
            code,
            text: tokens[code_index + 1..].join(" "),
        })
    }

    /// Returns true for informational and success codes
    pub fn is_ok(&self) -> bool {
        self.code < 400
    }

    /// The whitespace separated token at `index` (0-based) of the raw line
    pub fn token(line: &str, index: usize) -> Option<&str> {
        line.split_whitespace().nth(index)
    }
}

fn is_status_code(token: &str) -> bool {
    token.len() == 3 && token.bytes().all(|b| b.is_ascii_digit())
}

/// Decode a reply into the error it reports, if any
///
/// This never fails: a reply without a recognizable code, or with an error
/// code this crate does not classify, becomes
/// [`ProtocolError::UnspecifiedError`] carrying the raw text.
pub fn decode(command: &str, reply: &str) -> Option<ProtocolError> {
    let Some(parsed) = Reply::parse(reply) else {
        debug!("Reply without status code to {:?}: {:?}", command, reply);
        return Some(ProtocolError::UnspecifiedError {
            reply: reply.to_string(),
        });
    };

    if parsed.is_ok() {
        return None;
    }

    Some(
        ProtocolError::from_code(parsed.code, command, reply).unwrap_or_else(|| {
            debug!("Unclassified status {} for {:?}", parsed.code, command);
            ProtocolError::UnspecifiedError {
                reply: reply.to_string(),
            }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_with_timestamp() {
        let reply = Reply::parse("1139428370.120 200 OK").unwrap();
        assert_eq!(reply.timestamp, Some(1139428370.120));
        assert_eq!(reply.code, 200);
        assert_eq!(reply.text, "OK");
        assert!(reply.is_ok());
    }

    #[test]
    fn test_parse_without_timestamp() {
        let reply = Reply::parse("412 ERROR wrong value").unwrap();
        assert_eq!(reply.timestamp, None);
        assert_eq!(reply.code, 412);
        assert_eq!(reply.text, "ERROR wrong value");
        assert!(!reply.is_ok());
    }

    #[test]
    fn test_parse_ignores_non_finite_timestamp() {
        for line in ["inf 200 OK", "NaN 200 OK", "-infinity 200 OK"] {
            let reply = Reply::parse(line).unwrap();
            assert_eq!(reply.timestamp, None, "{line}");
            assert_eq!(reply.code, 200);
        }
    }

    #[test]
    fn test_parse_garbage() {
        assert!(Reply::parse("garbage").is_none());
        assert!(Reply::parse("").is_none());
        assert!(Reply::parse("1234 OK").is_none());
    }

    #[test]
    fn test_decode_success() {
        assert_eq!(decode("SET 1 GL 3 1 5 14 0", "200 OK"), None);
        assert_eq!(decode("GO", "1139428370.130 200 OK GO 7"), None);
        assert_eq!(decode("INIT 1 GL 3 M 1 14 1", "101 INFO 1 GL 3"), None);
    }

    #[test]
    fn test_decode_wrong_value() {
        let err = decode("SET 1 GL 3 ...", "412 ERROR wrong value").unwrap();
        assert_eq!(
            err,
            ProtocolError::WrongValue {
                command: "SET 1 GL 3 ...".into()
            }
        );
        assert_eq!(err.code(), 412);
    }

    #[test]
    fn test_decode_with_timestamp_prefix() {
        let err = decode("SET 1 GL 3 1 5 14 0", "1139428370.120 413 ERROR temporarily prohibited");
        assert!(matches!(err, Some(ProtocolError::TemporarilyProhibited { .. })));

        let err = decode("GET 1 GL 3", "1139428370.120 603 ERROR io");
        assert!(matches!(err, Some(ProtocolError::ServerIoError { .. })));
    }

    #[test]
    fn test_decode_garbage_keeps_text() {
        assert_eq!(
            decode("SET 1 GL 3 ...", "garbage"),
            Some(ProtocolError::UnspecifiedError {
                reply: "garbage".into()
            })
        );
    }

    #[test]
    fn test_decode_unknown_error_code() {
        assert_eq!(
            decode("SET 1 FOO", "1139428370.120 415 ERROR forbidden"),
            Some(ProtocolError::UnspecifiedError {
                reply: "1139428370.120 415 ERROR forbidden".into()
            })
        );
    }

    proptest! {
        #[test]
        fn decode_never_panics(command in ".*", reply in ".*") {
            let _ = decode(&command, &reply);
        }

        #[test]
        fn success_codes_never_error(code in 100u16..400, text in "[A-Za-z ]{0,20}") {
            let line = format!("{} {}", code, text);
            prop_assert_eq!(decode("GET 1 GL 1", &line), None);
        }

        #[test]
        fn error_codes_always_error(code in 400u16..700) {
            let line = format!("1.0 {} ERROR", code);
            let err = decode("GET 1 GL 1", &line);
            prop_assert!(err.is_some());
        }
    }
}
