use thiserror::Error;

/// The universal error type for the Parley client core.
#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("REST error: {0}")]
    Rest(String),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for Parley operations.
pub type Result<T> = std::result::Result<T, ParleyError>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum EventBusError {
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Subscriber lagged: {0} events missed")]
    Lagged(u64),
}
