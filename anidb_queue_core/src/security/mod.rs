//! Credential protection
//!
//! The AniDB password is held in a [`SecureString`] from the moment the
//! configuration is loaded until the AUTH datagram is encoded.

pub mod secure_string;

pub use secure_string::SecureString;
