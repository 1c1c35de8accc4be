use thiserror::Error;

#[derive(Debug, Error)]
pub enum PijonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid portion size: {0}")]
    InvalidPortion(String),

    #[error("Invalid time of day: {0}")]
    InvalidTime(String),

    #[error("Malformed feed command: {0}")]
    InvalidCommand(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PijonError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            PijonError::Config(_) => "CONFIG_ERROR",
            PijonError::InvalidPortion(_) => "INVALID_PORTION",
            PijonError::InvalidTime(_) => "INVALID_TIME",
            PijonError::InvalidCommand(_) => "INVALID_COMMAND",
            PijonError::Transport(_) => "TRANSPORT_ERROR",
            PijonError::Serialization(_) => "SERIALIZATION_ERROR",
            PijonError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, PijonError>;
