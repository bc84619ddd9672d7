//! Shared library surface for the route service and its tests.

pub mod api;
pub mod backoff;
pub mod cache;
pub mod config;
pub mod loops;
pub mod persistence;
pub mod scheduler;
pub mod snapshot;
pub mod state;
