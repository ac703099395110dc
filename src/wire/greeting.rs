//! ASCII greeting handshake.
//!
//! Before any framed traffic, each side of a connection exchanges a line-oriented,
//! ASCII greeting: `RMFP/<major>.<minor>\n<Header-Name>: <value>\n...\n\n`. The only
//! header currently defined is `NumHeader-Format`, whose value is the width in bits of
//! the address-header tag/more bits (`32`, matching the high-form layout below).

use crate::error::{Error, Result};

pub const PROTOCOL_MAJOR: u32 = 1;
pub const PROTOCOL_MINOR: u32 = 0;
pub const NUM_HEADER_FORMAT: u32 = 32;

/// A parsed greeting line exchanged at connection setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub major: u32,
    pub minor: u32,
    pub num_header_format: u32,
}

impl Default for Greeting {
    fn default() -> Self {
        Self {
            major: PROTOCOL_MAJOR,
            minor: PROTOCOL_MINOR,
            num_header_format: NUM_HEADER_FORMAT,
        }
    }
}

impl Greeting {
    /// Render this greeting as the exact ASCII bytes sent on the wire, including the
    /// terminating blank line.
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "RMFP/{}.{}\nNumHeader-Format: {}\n\n",
            self.major, self.minor, self.num_header_format
        )
        .into_bytes()
    }

    /// Parse a complete greeting (including its terminating blank line) from `data`.
    /// Returns the greeting and the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Greeting, usize)> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::ParseError("greeting is not valid UTF-8".into()))?;
        let end = text
            .find("\n\n")
            .ok_or_else(|| Error::ParseError("greeting missing terminating blank line".into()))?;
        let consumed = end + 2;
        let mut lines = text[..end].split('\n');

        let start_line = lines
            .next()
            .ok_or_else(|| Error::ParseError("empty greeting".into()))?;
        let version = start_line
            .strip_prefix("RMFP/")
            .ok_or_else(|| Error::ParseError(format!("unrecognized greeting line {start_line:?}")))?;
        let (major_str, minor_str) = version
            .split_once('.')
            .ok_or_else(|| Error::ParseError(format!("malformed version {version:?}")))?;
        let major = major_str
            .parse()
            .map_err(|_| Error::ParseError(format!("malformed major version {major_str:?}")))?;
        let minor = minor_str
            .parse()
            .map_err(|_| Error::ParseError(format!("malformed minor version {minor_str:?}")))?;

        let mut num_header_format = None;
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::ParseError(format!("malformed greeting header {line:?}")))?;
            let value = value.trim();
            match name {
                "NumHeader-Format" => {
                    num_header_format = Some(value.parse().map_err(|_| {
                        Error::ParseError(format!("malformed NumHeader-Format value {value:?}"))
                    })?);
                }
                other => {
                    return Err(Error::ParseError(format!("unknown greeting header {other:?}")));
                }
            }
        }

        let num_header_format = num_header_format
            .ok_or_else(|| Error::ParseError("greeting missing NumHeader-Format header".into()))?;

        Ok((
            Greeting {
                major,
                minor,
                num_header_format,
            },
            consumed,
        ))
    }

    /// Whether a peer's greeting is compatible with ours: matching major version and
    /// matching address-header format width.
    pub fn is_compatible_with(&self, peer: &Greeting) -> bool {
        self.major == peer.major && self.num_header_format == peer.num_header_format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_greeting_encodes_expected_wire_bytes() {
        let greeting = Greeting::default();
        assert_eq!(greeting.encode(), b"RMFP/1.0\nNumHeader-Format: 32\n\n");
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let greeting = Greeting::default();
        let encoded = greeting.encode();
        let (decoded, consumed) = Greeting::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, greeting);
    }

    #[test]
    fn compatible_greetings_match_major_and_format() {
        let a = Greeting::default();
        let b = Greeting {
            minor: 7,
            ..Greeting::default()
        };
        assert!(a.is_compatible_with(&b));
    }

    #[test]
    fn incompatible_major_version_is_detected() {
        let a = Greeting::default();
        let b = Greeting {
            major: 2,
            ..Greeting::default()
        };
        assert!(!a.is_compatible_with(&b));
    }

    #[test]
    fn missing_blank_line_is_rejected() {
        assert!(Greeting::decode(b"RMFP/1.0\nNumHeader-Format: 32\n").is_err());
    }

    #[test]
    fn unknown_header_is_rejected() {
        assert!(Greeting::decode(b"RMFP/1.0\nX-Bogus: 1\n\n").is_err());
    }
}
