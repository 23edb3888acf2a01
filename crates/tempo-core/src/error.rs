use thiserror::Error;

/// Errors raised by the core crate itself.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The configuration file or environment overrides could not be read.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
