//! Contract with the remote watch service.
//!
//! The coordinator only depends on [`WatchService`]; how requests reach the
//! vendor cloud is up to the implementation.

#[cfg(feature = "remote_http")]
mod http;
#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use async_trait::async_trait;

#[cfg(feature = "remote_http")]
pub use http::HttpWatchService;

use crate::watch::CommandField;
use crate::watch::RawTelemetry;
use crate::watch::WatchId;

/// How a failed remote call should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry with backoff, keep cached state.
    Transient,
    /// Stop polling until the watch is reconfigured.
    Persistent,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("remote service returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("watch {0} is not known to the account")]
    UnknownWatch(WatchId),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("command rejected: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: u16, message: impl Into<String>, watch: &WatchId) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::AuthRejected(message),
            404 => Self::UnknownWatch(watch.clone()),
            409 | 422 => Self::Rejected(message),
            _ => Self::Status { status, message },
        }
    }

    /// How a failed poll is handled. Only a rejected login or a watch the
    /// account no longer owns stop polling; anything else is retried.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::AuthRejected(_) | Self::UnknownWatch(_) => FailureClass::Persistent,
            Self::Timeout(_)
            | Self::Network(_)
            | Self::InvalidPayload(_)
            | Self::Status { .. }
            | Self::Rejected(_) => FailureClass::Transient,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }
}

/// Authenticated request/response access to the vendor cloud.
#[async_trait]
pub trait WatchService: Send + Sync {
    /// Fetch the current telemetry of one watch.
    async fn fetch_state(&self, watch: &WatchId) -> Result<RawTelemetry, RemoteError>;

    /// Change a writable field on the watch.
    async fn send_command(
        &self,
        watch: &WatchId,
        field: CommandField,
        value: bool,
    ) -> Result<(), RemoteError>;
}
