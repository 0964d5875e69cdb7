//! Error types returned by the Calil client.

use thiserror::Error;

use crate::calil_client::Endpoint;

/// Everything a call against the catalog service can fail with.
#[derive(Error, Debug)]
pub enum CalilError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Connection, DNS or body-read failure.
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: Endpoint,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: Endpoint },

    /// The service answered, but refused the request.
    #[error("{endpoint} responded with HTTP {status}: {message}")]
    Remote {
        endpoint: Endpoint,
        status: u16,
        message: String,
    },

    #[error("malformed response from {endpoint}: {reason}")]
    Malformed {
        endpoint: Endpoint,
        #[source]
        reason: MalformedReason,
    },

    #[error("session {session} still running after {attempts} polls")]
    PollingExhausted { session: String, attempts: u32 },
}

#[derive(Error, Debug)]
pub enum MalformedReason {
    #[error("body of {0} bytes is too short to unwrap")]
    TooShort(usize),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("result is still running but carries no session")]
    MissingSession,
}

impl CalilError {
    pub(crate) fn transport(endpoint: Endpoint, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            CalilError::Timeout { endpoint }
        } else {
            CalilError::Transport { endpoint, source }
        }
    }

    pub(crate) fn malformed(endpoint: Endpoint, reason: impl Into<MalformedReason>) -> Self {
        CalilError::Malformed {
            endpoint,
            reason: reason.into(),
        }
    }

    /// HTTP status for `Remote` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            CalilError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, CalilError::Remote { .. })
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, CalilError::Malformed { .. })
    }

    /// Transport and timeout failures; the request may not have reached the service.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CalilError::Transport { .. } | CalilError::Timeout { .. }
        )
    }
}

pub type CalilResult<T> = Result<T, CalilError>;
