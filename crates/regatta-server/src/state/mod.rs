//! Shared application state.

mod store;

pub use store::{AppState, RetryInfo};
