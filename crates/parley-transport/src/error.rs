use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid socket url: {0}")]
    InvalidUrl(String),

    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("failed to send frame: {0}")]
    SendFailed(String),

    #[error("failed to encode or decode frame: {0}")]
    Serialization(#[from] serde_json::Error),
}
