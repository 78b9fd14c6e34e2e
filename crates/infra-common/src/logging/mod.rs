//! Logging setup for the stack

mod setup;

pub use setup::{log_welcome, parse_log_level, setup_logging, setup_test_logging, LoggingConfig};
