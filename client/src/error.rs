//! Client errors.

use thiserror::Error;

/// Errors reported by the [`EventChannel`](crate::EventChannel).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Could not open the connection
    #[error("connection failed: {0}")]
    Connection(String),

    /// The server refused the credential; the session must sign in again
    #[error("credential expired")]
    CredentialExpired,

    /// Every retry failed
    #[error("gave up after {attempts} attempts: {last}")]
    GaveUp {
        /// Connection attempts made, the initial one included
        attempts: usize,
        /// Failure of the final attempt
        last: String,
    },

    /// The caller disconnected while the operation was pending
    #[error("channel closed")]
    Closed,

    /// A frame could not be encoded or decoded
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors returned by the [`BookingApi`](crate::BookingApi).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The server answered 401
    #[error("credential expired")]
    CredentialExpired,

    /// The server rejected the request
    #[error("{status} {code}: {message}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// Machine-readable code, e.g. `INVALID_TRANSITION`
        code: String,
        /// Human-readable message
        message: String,
    },

    /// The request never got an answer
    #[error("transport error: {0}")]
    Transport(String),

    /// The answer could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Machine-readable code of a rejection
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } => Some(code),
            Self::CredentialExpired => Some("CREDENTIAL_EXPIRED"),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Errors returned by the [`Session`](crate::Session).
#[derive(Error, Debug)]
pub enum SessionError {
    /// The channel did not connect
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The session store stopped accepting actions
    #[error("session store: {0}")]
    Store(#[from] bookwell_runtime::StoreError),
}
