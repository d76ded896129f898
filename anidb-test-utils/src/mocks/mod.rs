//! Mock implementations for testing

mod executor;
mod hasher;
mod http;
mod store;
mod transport;

pub use executor::{Execution, ExecutorStep, RecordingExecutor};
pub use hasher::MockFileHasher;
pub use http::{HttpReply, MockHttpApi};
pub use store::FaultyCommandStore;
pub use transport::{MockTransport, Reply, SentDatagram};
