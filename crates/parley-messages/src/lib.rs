//! Message history, optimistic sends, and read receipts.
//!
//! [`ConversationController`] owns the open chat's message list and its
//! reconciliation rules; [`SendPipeline`] routes outbound messages over
//! the realtime link or the REST fallback; [`ReadReceipts`] keeps the
//! server's read state in sync on a best-effort basis.

mod controller;
mod error;
mod pipeline;
mod receipts;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::ConversationController;
pub use error::ConversationError;
pub use pipeline::SendPipeline;
pub use receipts::ReadReceipts;
