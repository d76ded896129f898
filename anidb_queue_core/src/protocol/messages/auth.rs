//! AUTH request and reply

use crate::protocol::error::{ProtocolError, Result};
use crate::protocol::messages::{UdpRequest, UdpResponse};
use crate::security::SecureString;

/// AUTH command for authenticating with the AniDB server
#[derive(Clone)]
pub struct AuthRequest {
    pub user: String,
    pub pass: SecureString,
    pub client: String,
    pub clientver: u32,
    /// Ask for our public `ip:port` in the reply
    pub nat: bool,
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("user", &"***")
            .field("pass", &"***")
            .field("client", &self.client)
            .field("clientver", &self.clientver)
            .field("nat", &self.nat)
            .finish()
    }
}

impl AuthRequest {
    pub fn new(
        user: impl Into<String>,
        pass: impl Into<SecureString>,
        client: impl Into<String>,
        clientver: u32,
    ) -> Self {
        Self {
            user: user.into(),
            pass: pass.into(),
            client: client.into(),
            clientver,
            nat: false,
        }
    }

    pub fn with_nat(mut self, nat: bool) -> Self {
        self.nat = nat;
        self
    }

    /// Reject empty credentials before anything touches the socket
    pub fn validate(&self) -> Result<()> {
        if self.user.trim().is_empty() || self.pass.is_empty() {
            return Err(ProtocolError::authentication_failed(
                "username and password must not be empty",
            ));
        }
        Ok(())
    }

    /// Build the wire request: user, pass, protover, client, clientver, then options
    pub fn to_request(&self) -> UdpRequest {
        UdpRequest::new("AUTH")
            .param("user", &self.user)
            .param("pass", self.pass.expose_secret())
            .param("protover", crate::protocol::PROTOCOL_VERSION)
            .param("client", &self.client)
            .param("clientver", self.clientver)
            .param_opt("nat", self.nat.then_some(1))
            .param("enc", "utf8")
    }
}

/// Session key extracted from a successful AUTH reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthReply {
    pub session: String,
    /// Public address reported in NAT mode
    pub public_addr: Option<String>,
    /// 201: a newer client version is available
    pub new_version_available: bool,
}

impl AuthReply {
    /// Parse a 200/201 reply: `{session} [{ip:port}] LOGIN ACCEPTED ...`
    pub fn parse(response: &UdpResponse) -> Result<Self> {
        let mut words = response.message.split_whitespace();
        let session = words
            .next()
            .filter(|word| *word != "LOGIN")
            .ok_or_else(|| ProtocolError::invalid_packet("AUTH reply without session key"))?
            .to_string();

        let public_addr = words
            .next()
            .filter(|word| word.contains(':'))
            .map(str::to_string);

        Ok(Self {
            session,
            public_addr,
            new_version_available: response.code == 201,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(code: u16, message: &str) -> UdpResponse {
        UdpResponse {
            tag: Some("t1".to_string()),
            code,
            message: message.to_string(),
            fields: Vec::new(),
        }
    }

    #[test]
    fn test_auth_request_order_and_masking() {
        let auth = AuthRequest::new("alice", "hunter2", "anidbqueue", 1).with_nat(true);
        let request = auth.to_request();
        let names: Vec<&str> = request.params().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            names,
            vec!["user", "pass", "protover", "client", "clientver", "nat", "enc"]
        );

        let debug = format!("{auth:?}");
        assert!(!debug.contains("alice"));
        assert!(!debug.contains("hunter2"));

        let masked = request.masked(None, "t1");
        assert!(!masked.contains("hunter2"));
        assert!(masked.contains("client=anidbqueue"));
    }

    #[test]
    fn test_empty_credentials_are_rejected() {
        assert!(AuthRequest::new("", "pw", "c", 1).validate().is_err());
        assert!(AuthRequest::new("user", "", "c", 1).validate().is_err());
        assert!(AuthRequest::new("user", "pw", "c", 1).validate().is_ok());
    }

    #[test]
    fn test_parse_session_key() {
        let parsed = AuthReply::parse(&reply(200, "iQUO2 LOGIN ACCEPTED")).unwrap();
        assert_eq!(parsed.session, "iQUO2");
        assert_eq!(parsed.public_addr, None);
        assert!(!parsed.new_version_available);

        let parsed =
            AuthReply::parse(&reply(201, "abcde 203.0.113.9:4567 LOGIN ACCEPTED - NEW VERSION AVAILABLE"))
                .unwrap();
        assert_eq!(parsed.session, "abcde");
        assert_eq!(parsed.public_addr.as_deref(), Some("203.0.113.9:4567"));
        assert!(parsed.new_version_available);
    }

    #[test]
    fn test_parse_without_session_key_fails() {
        assert!(AuthReply::parse(&reply(200, "LOGIN ACCEPTED")).is_err());
        assert!(AuthReply::parse(&reply(200, "")).is_err());
    }
}
