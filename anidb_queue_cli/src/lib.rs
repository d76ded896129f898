//! AniDB queue service and operator CLI
//!
//! The binary in `main.rs` only parses arguments; everything it runs lives
//! here so it can be tested without spawning the process.

pub mod config;
pub mod enqueue;
pub mod error;
pub mod operator;
pub mod output;
pub mod paths;
pub mod runtime;
