//! # sipline-infra-common
//!
//! Infrastructure shared by the sipline crates, their tests and embedding
//! applications. Currently this is the `tracing` subscriber setup.

pub mod errors;
pub mod logging;

pub use errors::{Error, Result};
pub use logging::{parse_log_level, setup_logging, setup_test_logging, LoggingConfig};
