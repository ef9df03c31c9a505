//! Relay server: event dispatch, HTTP/WebSocket handlers and bootstrap.

pub mod dispatcher;
mod handler;
mod runner;
mod signal;
pub mod state;

pub use runner::{ServerError, run, run_until};
