use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestError {
    #[error("no bearer credential available")]
    MissingCredentials,

    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}
