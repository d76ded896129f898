//! Test utilities for the AniDB command queues
//!
//! Mock implementations of the protocol, HTTP, hashing and storage seams,
//! plus a harness that wires them into a ready-to-run command context.

pub mod builders;
pub mod mocks;

// Re-export commonly used types
pub use builders::{
    CommandBuilder, TestHarness, TestHarnessBuilder, anime_xml, file_reply, group_reply,
};
pub use mocks::{
    ExecutorStep, FaultyCommandStore, HttpReply, MockFileHasher, MockHttpApi, MockTransport,
    RecordingExecutor, Reply, SentDatagram,
};
