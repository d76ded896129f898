//! Incoming UDP replies

use crate::protocol::error::{ProtocolError, ResponseCode, Result};
use crate::protocol::messages::{parse_response_fields, parse_response_header};
use serde::Serialize;

/// One decoded reply datagram
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UdpResponse {
    /// Echoed correlation tag, absent for replies the server could not attribute
    pub tag: Option<String>,
    pub code: u16,
    pub message: String,
    /// `|`-separated fields of the first data line
    pub fields: Vec<String>,
}

impl UdpResponse {
    /// Parse `[{tag} ]{code} {message}\n{field}|{field}...`
    ///
    /// Tags produced by the client always start with a letter, so a leading
    /// numeric token is the response code of an untagged reply.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();
        let header = lines
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .ok_or_else(|| ProtocolError::invalid_packet("Empty response"))?;

        let (tag, rest) = match header.split_once(' ') {
            Some((first, rest)) if first.parse::<u16>().is_err() => {
                (Some(first.to_string()), rest)
            }
            _ => (None, header),
        };

        let (code, message) = parse_response_header(rest)?;
        let fields = lines.next().map(parse_response_fields).unwrap_or_default();

        Ok(Self {
            tag,
            code,
            message,
            fields,
        })
    }

    pub fn response_code(&self) -> ResponseCode {
        ResponseCode(self.code)
    }

    /// Whether this reply belongs to the request sent with `tag`
    pub fn matches(&self, tag: &str) -> bool {
        self.tag.as_deref().is_none_or(|t| t == tag)
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }
}
