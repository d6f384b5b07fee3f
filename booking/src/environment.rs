//! External dependencies of the booking services.
//!
//! ```text
//!   request ──► LifecycleEngine / BookingThread
//!                      │
//!                      ▼
//!              1. save(booking, expected_revision)   ◄── BookingRepository
//!                      │                                 (source of truth)
//!                      ▼
//!              2. publish(event)                     ◄── EventPublisher
//!                                                        (best effort)
//! ```
//!
//! Both traits return boxed futures so they stay object-safe and can be
//! shared as `Arc<dyn ...>`.

use crate::error::{PublishError, RepositoryError};
use crate::events::BookingEvent;
use crate::types::{Booking, BookingId, ParticipantId};
use bookwell_core::environment::{Clock, SystemClock};
use bookwell_runtime::RetryPolicy;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Boxed, sendable future returned by the environment traits
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persistent booking storage with optimistic concurrency.
pub trait BookingRepository: Send + Sync {
    /// Load the current version of a booking.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] for unknown ids, or a store failure.
    fn load(&self, id: BookingId) -> BoxFuture<'_, Result<Booking, RepositoryError>>;

    /// Store a new booking.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::AlreadyExists`] if the id is taken, or a store failure.
    fn insert(&self, booking: Booking) -> BoxFuture<'_, Result<(), RepositoryError>>;

    /// Replace a booking, provided the stored revision still equals
    /// `expected_revision`.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Conflict`] when another writer got there first.
    fn save(
        &self,
        booking: Booking,
        expected_revision: u64,
    ) -> BoxFuture<'_, Result<(), RepositoryError>>;

    /// Every booking `participant` is a party to, newest first.
    ///
    /// # Errors
    ///
    /// A store failure.
    fn list_for(
        &self,
        participant: ParticipantId,
    ) -> BoxFuture<'_, Result<Vec<Booking>, RepositoryError>>;
}

/// Hands domain events to the delivery side (rooms, sockets, queues).
pub trait EventPublisher: Send + Sync {
    /// Publish one event.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when the event could not be handed off.
    fn publish(&self, event: BookingEvent) -> BoxFuture<'_, Result<(), PublishError>>;
}

/// Attempts allowed when a save races another writer
pub const DEFAULT_CONFLICT_RETRIES: usize = 3;

/// Everything the booking services need from the outside world.
#[derive(Clone)]
pub struct BookingEnvironment {
    /// Source of truth
    pub repository: Arc<dyn BookingRepository>,
    /// Event fan-out
    pub publisher: Arc<dyn EventPublisher>,
    /// Time source for timeline stamps
    pub clock: Arc<dyn Clock>,
    /// Reload-and-revalidate policy for revision conflicts
    pub conflict_retry: RetryPolicy,
}

impl BookingEnvironment {
    /// Environment with the system clock and the default conflict policy
    #[must_use]
    pub fn new(
        repository: Arc<dyn BookingRepository>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            repository,
            publisher,
            clock: Arc::new(SystemClock),
            conflict_retry: RetryPolicy::fixed(DEFAULT_CONFLICT_RETRIES, Duration::from_millis(10))
                .with_jitter(),
        }
    }

    /// Replace the clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the conflict policy
    #[must_use]
    pub fn with_conflict_retry(mut self, policy: RetryPolicy) -> Self {
        self.conflict_retry = policy;
        self
    }
}

impl std::fmt::Debug for BookingEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingEnvironment")
            .field("conflict_retry", &self.conflict_retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryBookingRepository, RecordingPublisher};

    #[test]
    fn racing_writers_retry_with_jitter() {
        let env = BookingEnvironment::new(
            Arc::new(InMemoryBookingRepository::new()),
            Arc::new(RecordingPublisher::new()),
        );
        assert_eq!(env.conflict_retry.max_retries, DEFAULT_CONFLICT_RETRIES);
        assert!(env.conflict_retry.jitter);
        assert!(env.conflict_retry.delay_for_attempt(0) <= Duration::from_millis(10));
    }
}
