//! Canonical error and result types for the crate.
//!
//! Component errors ([`RouteError`], [`ProcessError`], [`SyncError`]) are
//! returned directly by the component that raises them. [`BridgeError`]
//! gathers them for callers that drive a whole connection.

use std::io;

use thiserror::Error;

use crate::{process::ProcessError, route::RouteError, synchronizer::SyncError};

/// Top-level error type exposed by `mudbridge`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BridgeError {
    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// A route could not be registered.
    #[error("route error: {0}")]
    Route(#[from] RouteError),
    /// A process operation failed.
    #[error("process error: {0}")]
    Process(#[from] ProcessError),
    /// A synchronizer was misused.
    #[error("synchronizer error: {0}")]
    Sync(#[from] SyncError),
    /// A configuration value was rejected.
    #[error("invalid configuration: {0}")]
    Config(&'static str),
}

impl BridgeError {
    /// Returns true if the remote end closed the connection.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Io(error) if matches!(
                error.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            )
        )
    }
}

/// Canonical result alias used by `mudbridge` public APIs.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(io::ErrorKind::ConnectionReset, true)]
    #[case(io::ErrorKind::BrokenPipe, true)]
    #[case(io::ErrorKind::PermissionDenied, false)]
    fn disconnects_are_recognised(#[case] kind: io::ErrorKind, #[case] expected: bool) {
        let error = BridgeError::from(io::Error::from(kind));
        assert_eq!(error.is_disconnect(), expected);
    }

    #[test]
    fn component_errors_convert_and_display() {
        let error = BridgeError::from(SyncError::NotRunning);
        assert_eq!(error.to_string(), "synchronizer error: synchronizer is not running");
        assert!(!error.is_disconnect());
        assert_eq!(
            BridgeError::from(RouteError::MissingPath).to_string(),
            "route error: route has no path"
        );
    }
}
