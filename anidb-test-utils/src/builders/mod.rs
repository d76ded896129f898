//! Builders and fixtures for queue scenarios

mod harness;
mod test_data;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use test_data::{CommandBuilder, anime_xml, file_reply, group_reply};
