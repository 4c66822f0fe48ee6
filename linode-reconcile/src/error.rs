//! Error types.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::state::ActionLog;

/// Errors returned by a [`ResourceClient`](crate::clients::ResourceClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The resource does not exist. Callers usually treat this as absence.
    #[error("not found: {0}")]
    NotFound(String),

    /// The API rejected the request.
    #[error("remote error {status}: {message}")]
    Remote { status: u16, message: String },

    /// The request never produced a response.
    #[error("transport: {0}")]
    Transport(String),

    /// The response could not be interpreted.
    #[error("invalid response: {0}")]
    Decode(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

/// Errors that abort a reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Missing, conflicting or invalid input. Never retried.
    #[error("{kind} {identity}: {message}")]
    Configuration {
        kind: &'static str,
        identity: String,
        message: String,
    },

    /// A local source file is missing. Raised before any remote mutation.
    #[error("{kind} {identity}: source file {} does not exist", .path.display())]
    FileNotFound {
        kind: &'static str,
        identity: String,
        path: PathBuf,
    },

    /// A lookup, create or delete call failed.
    #[error("failed to {operation} {kind} {identity}: {source}")]
    Remote {
        operation: &'static str,
        kind: &'static str,
        identity: String,
        #[source]
        source: ClientError,
    },

    /// The batched update call failed; none of its fields were reported.
    #[error("failed to update {kind} {identity}: {source}")]
    Update {
        kind: &'static str,
        identity: String,
        #[source]
        source: ClientError,
    },

    #[error(
        "timed out waiting for {kind} {identity} to reach status {targets:?} after {:.1}s",
        .elapsed.as_secs_f64()
    )]
    Timeout {
        kind: &'static str,
        identity: String,
        targets: BTreeSet<String>,
        elapsed: Duration,
    },

    /// Refreshing the resource failed while polling its status.
    #[error("failed to refresh {kind} {identity} while waiting for status: {source}")]
    Poll {
        kind: &'static str,
        identity: String,
        #[source]
        source: ClientError,
    },
}

impl ReconcileError {
    pub(crate) fn configuration(
        kind: &'static str,
        identity: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ReconcileError::Configuration {
            kind,
            identity: identity.into(),
            message: message.into(),
        }
    }

    pub(crate) fn remote(
        operation: &'static str,
        kind: &'static str,
        identity: impl Into<String>,
        source: ClientError,
    ) -> Self {
        ReconcileError::Remote {
            operation,
            kind,
            identity: identity.into(),
            source,
        }
    }
}

/// A failed reconciliation together with the actions already performed.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ReconcileFailure {
    pub actions: ActionLog,
    #[source]
    pub error: ReconcileError,
}
