//! AniDB UDP message encoding
//!
//! Requests are built with [`UdpRequest`]; every request carries a `tag`
//! that the server echoes so replies can be matched to the call that is
//! waiting for them.

pub mod auth;
pub mod request;
pub mod response;

pub use auth::AuthRequest;
pub use request::UdpRequest;
pub use response::UdpResponse;

use crate::protocol::error::{ProtocolError, Result};

/// Parameter separator used in AniDB protocol
pub const PARAM_SEPARATOR: char = '|';

/// Newline encoding for multiline values
pub const ENCODED_NEWLINE: &str = "<br />";

/// Quote encoding
pub const ENCODED_QUOTE: &str = "`";

/// Pipe encoding
pub const ENCODED_PIPE: &str = "/";

/// Encode a value for AniDB protocol transmission
///
/// Only `&` (as `&amp;`) and newlines (as `<br />`) are escaped; carriage
/// returns are dropped and everything else is sent as UTF-8.
pub fn encode_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len() + 8);

    for ch in value.chars() {
        match ch {
            '&' => result.push_str("&amp;"),
            '\n' => result.push_str(ENCODED_NEWLINE),
            '\r' => {}
            _ => result.push(ch),
        }
    }

    result
}

/// Decode a value from AniDB protocol format
///
/// Reverses [`encode_value`] and maps the server's backtick and lone-slash
/// substitutions back to `'` and `|`.
pub fn decode_value(value: &str) -> String {
    if value == ENCODED_PIPE {
        return "|".to_string();
    }

    let mut result = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(ch) = rest.chars().next() {
        if let Some(tail) = rest.strip_prefix("&amp;") {
            result.push('&');
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix(ENCODED_NEWLINE) {
            result.push('\n');
            rest = tail;
        } else {
            result.push(if ch == '`' { '\'' } else { ch });
            rest = &rest[ch.len_utf8()..];
        }
    }

    result
}

/// Parse an untagged header line (`{code} {message}`) into code and message
pub fn parse_response_header(line: &str) -> Result<(u16, String)> {
    let (code, message) = line.split_once(' ').unwrap_or((line, ""));

    let code = code
        .parse::<u16>()
        .map_err(|_| ProtocolError::invalid_packet(format!("Invalid response code: {code:?}")))?;

    Ok((code, message.to_string()))
}

/// Parse response fields from a data line
pub fn parse_response_fields(line: &str) -> Vec<String> {
    line.split(PARAM_SEPARATOR).map(decode_value).collect()
}
