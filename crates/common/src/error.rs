//! Configuration errors

use thiserror::Error;

/// Failure to load or validate a configuration file.
#[derive(Error, Debug)]
pub enum Error {
    /// A value parsed but is not acceptable.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
