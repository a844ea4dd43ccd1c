pub mod auth;
pub mod config;
pub mod error;
pub mod event;
pub mod model;

pub use error::{EventBusError, ParleyError, Result};
