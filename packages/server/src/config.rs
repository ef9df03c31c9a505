//! Server configuration.

use std::time::Duration;

use crate::{infrastructure::dto::websocket::EventSettings, usecase::RetryPolicy};

/// Configuration for the relay server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `4000`).
    pub port: u16,
    /// Room codes accepted at authentication.
    pub rooms: Vec<String>,
    /// Signaling timeout handed to clients in `connected-init`.
    pub signal_timeout_ms: u64,
    /// Timeout of a single store call.
    pub store_timeout_ms: u64,
    /// Attempts per store call, including the first.
    pub store_retry_attempts: u32,
    /// Delay before the first retry; doubled on each further retry.
    pub store_retry_backoff_ms: u64,
    /// Interval of the deferred presence write flush.
    pub deferred_flush_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4000,
            rooms: vec!["party".into()],
            signal_timeout_ms: 5_000,
            store_timeout_ms: 3_000,
            store_retry_attempts: 3,
            store_retry_backoff_ms: 100,
            deferred_flush_secs: 30,
        }
    }
}

impl ServerConfig {
    /// `host:port` string to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.store_retry_attempts.max(1),
            backoff: Duration::from_millis(self.store_retry_backoff_ms),
            timeout: Duration::from_millis(self.store_timeout_ms),
        }
    }

    pub fn event_settings(&self) -> EventSettings {
        EventSettings {
            signal_timeout_ms: self.signal_timeout_ms,
        }
    }

    pub fn deferred_flush_interval(&self) -> Duration {
        Duration::from_secs(self.deferred_flush_secs.max(1))
    }
}
