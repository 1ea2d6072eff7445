//! Helpers shared by the test suites of the workspace crates.

pub mod log;

pub use log::init_test_logging;
