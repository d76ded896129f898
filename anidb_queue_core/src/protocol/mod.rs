//! AniDB protocol layer
//!
//! - `guard`: send spacing, ban state and back-off windows shared by UDP and HTTP
//! - `client`: the UDP session actor and its cloneable handle
//! - `keepalive`: periodic tick driving ping, forced logout and ban expiry
//! - `http`: the HTTP API client
//! - `messages`: request encoding and reply parsing
//! - `transport`: datagram transport abstraction

pub mod client;
pub mod error;
pub mod guard;
pub mod http;
pub mod keepalive;
pub mod messages;
pub mod outcome;
pub mod transport;

pub use client::{AniDbClient, ClientSettings, SessionState};
pub use error::{ProtocolError, ResponseCode, Result};
pub use guard::{
    BanOrigin, BanState, ExtendedPause, GuardSettings, GuardSnapshot, KeepAliveAction, SendKind,
    SessionGuard, SessionSignals,
};
pub use http::{AniDbHttpClient, HttpApi};
pub use keepalive::KeepAlive;
pub use messages::{AuthRequest, UdpRequest, UdpResponse};
pub use outcome::{HttpOutcome, UdpOutcome};
pub use transport::{Transport, UdpTransport};

/// Protocol version supported by this implementation
pub const PROTOCOL_VERSION: &str = "3";

/// Maximum UDP packet size (considering PPPoE)
pub const MAX_PACKET_SIZE: usize = 1400;

/// Default AniDB server address
pub const DEFAULT_SERVER: &str = "api.anidb.net";

/// Default AniDB UDP port
pub const DEFAULT_PORT: u16 = 9000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_constants() {
        assert_eq!(PROTOCOL_VERSION, "3");
        assert_eq!(MAX_PACKET_SIZE, 1400);
        assert_eq!(DEFAULT_SERVER, "api.anidb.net");
        assert_eq!(DEFAULT_PORT, 9000);
    }
}
