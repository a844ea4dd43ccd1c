use parley_rest::RestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("rest request failed: {0}")]
    Rest(#[from] RestError),

    #[error("a send is already in progress")]
    SendInProgress,

    #[error("event bus error: {0}")]
    EventBus(String),
}
