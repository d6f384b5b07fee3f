//! Booking errors.

use crate::types::{BookingId, BookingStatus, ParticipantId, Role};
use thiserror::Error;

/// Errors returned by lifecycle, thread and store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// The edge is not in the transition matrix
    #[error("cannot move a booking from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: BookingStatus,
        /// Requested status
        to: BookingStatus,
    },

    /// The edge exists but this role may not take it
    #[error("a {role} may not move a booking from {from} to {to}")]
    Unauthorized {
        /// Acting role
        role: Role,
        /// Current status
        from: BookingStatus,
        /// Requested status
        to: BookingStatus,
    },

    /// Ratings are only accepted on completed bookings
    #[error("booking is {status}; only completed bookings can be rated")]
    NotCompleted {
        /// Current status
        status: BookingStatus,
    },

    /// The rater already left a rating
    #[error("participant {0} has already rated this booking")]
    DuplicateRating(ParticipantId),

    /// Rating outside 1..=5
    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRatingValue(i32),

    /// Message text is blank
    #[error("message cannot be empty")]
    EmptyMessage,

    /// A new booking failed validation
    #[error("invalid booking: {0}")]
    InvalidBooking(String),

    /// No such booking
    #[error("booking {0} not found")]
    NotFound(BookingId),

    /// The external store rejected the caller's credential
    #[error("credential expired")]
    CredentialExpired,

    /// The external store failed
    #[error("booking store error: {0}")]
    Store(String),
}

impl BookingError {
    /// Stable machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::NotCompleted { .. } => "NOT_COMPLETED",
            Self::DuplicateRating(_) => "DUPLICATE_RATING",
            Self::InvalidRatingValue(_) => "INVALID_RATING_VALUE",
            Self::EmptyMessage => "EMPTY_MESSAGE",
            Self::InvalidBooking(_) => "INVALID_BOOKING",
            Self::NotFound(_) => "NOT_FOUND",
            Self::CredentialExpired => "CREDENTIAL_EXPIRED",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    /// Whether the caller's request was rejected by domain rules
    /// (as opposed to an infrastructure failure)
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        !matches!(
            self,
            Self::NotFound(_) | Self::CredentialExpired | Self::Store(_)
        )
    }
}

/// Failures of a [`BookingRepository`](crate::environment::BookingRepository).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// No booking with this id
    #[error("booking {0} not found")]
    NotFound(BookingId),

    /// A booking with this id already exists
    #[error("booking {0} already exists")]
    AlreadyExists(BookingId),

    /// Someone else saved first
    #[error("revision conflict: expected {expected}, found {actual}")]
    Conflict {
        /// Revision the writer loaded
        expected: u64,
        /// Revision currently stored
        actual: u64,
    },

    /// Credential rejected by the store
    #[error("credential expired")]
    CredentialExpired,

    /// Store unreachable or failing
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<RepositoryError> for BookingError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => Self::NotFound(id),
            RepositoryError::CredentialExpired => Self::CredentialExpired,
            other => Self::Store(other.to_string()),
        }
    }
}

/// Failure to hand a domain event to the delivery side.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to publish event: {0}")]
pub struct PublishError(pub String);
