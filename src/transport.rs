//! Transport capability consumed by the SDK.
//!
//! The SDK never opens sockets itself. A [`Connector`] performs the
//! connection handshake and yields a [`Transport`], which can open server
//! streams for the continuous data feeds, open the calibration duplex
//! stream, and issue one-shot configuration calls. Implementations classify
//! their failures with [`StatusKind`] so the session and feed loops can
//! decide what is retryable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::proto::{
    CalibrationControl, CalibrationStatus, ConfigRequest, ConfigResponse, FeedItem, FeedRequest,
};

/// Classification of a transport failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusKind {
    /// The call or stream was cancelled. Expected during teardown.
    Cancelled,
    /// The device is unreachable or the connection dropped.
    Unavailable,
    /// The device reported an internal failure.
    Internal,
    /// A deadline elapsed before the operation completed.
    DeadlineExceeded,
    /// The peer violated the protocol contract. Never retried.
    Protocol,
    /// Anything the transport could not classify.
    Other,
}

impl StatusKind {
    /// Whether a failed connection attempt with this classification is worth
    /// retrying.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Unavailable | Self::Internal | Self::DeadlineExceeded | Self::Other
        )
    }

    /// Whether a mid-stream failure with this classification means the
    /// device became unreachable, as opposed to an unexpected failure.
    /// Unavailability is logged as a warning, everything else as an error.
    pub fn is_unavailability(self) -> bool {
        matches!(
            self,
            Self::Unavailable | Self::Internal | Self::DeadlineExceeded
        )
    }
}

/// Error reported by a transport implementation.
#[derive(Clone, Debug, Error)]
#[error("transport failure ({kind:?}): {message}")]
pub struct TransportError {
    kind: StatusKind,
    message: String,
}

impl TransportError {
    /// Creates an error with an explicit classification.
    pub fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The failure classification.
    pub fn kind(&self) -> StatusKind {
        self.kind
    }

    pub(crate) fn deadline(message: impl Into<String>) -> Self {
        Self::new(StatusKind::DeadlineExceeded, message)
    }
}

/// Server stream carrying items for one continuous data feed.
///
/// `Ok(None)` is a clean end-of-stream, which feed loops treat as an
/// invitation to resubscribe rather than a failure.
#[async_trait]
pub trait FeedStream: Send {
    async fn next(&mut self) -> Result<Option<FeedItem>, TransportError>;
}

/// Write end of the calibration duplex stream.
#[async_trait]
pub trait CalibrationSink: Send + Sync {
    /// Sends one control message to the device.
    async fn send(&self, message: CalibrationControl) -> Result<(), TransportError>;
}

/// Read end of the calibration duplex stream.
#[async_trait]
pub trait CalibrationSource: Send {
    /// Next status message; `Ok(None)` is a clean end-of-stream.
    async fn next(&mut self) -> Result<Option<CalibrationStatus>, TransportError>;
}

/// Live RPC connection to the eye tracker.
///
/// Handles are swappable: the session manager replaces the active transport
/// on reconnect, so holders must fetch a fresh handle per operation instead
/// of caching one across reconnects.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a server stream for one continuous data feed.
    async fn open_feed(&self, request: FeedRequest)
        -> Result<Box<dyn FeedStream>, TransportError>;

    /// Opens the calibration duplex stream.
    async fn open_calibration(
        &self,
    ) -> Result<(Arc<dyn CalibrationSink>, Box<dyn CalibrationSource>), TransportError>;

    /// Issues a one-shot configuration request.
    async fn call(&self, request: ConfigRequest) -> Result<ConfigResponse, TransportError>;
}

/// Factory performing the connection handshake.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Attempts a single handshake bounded by `timeout`.
    async fn connect(&self, timeout: Duration) -> Result<Arc<dyn Transport>, TransportError>;
}
