use thiserror::Error;

/// Errors raised while setting up shared infrastructure
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// A global subscriber is already installed, or installing it failed
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
