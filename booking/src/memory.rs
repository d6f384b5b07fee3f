//! In-memory implementations of the booking environment.
//!
//! Used by tests and by the web server when no external store is configured.

use crate::environment::{BookingRepository, BoxFuture, EventPublisher};
use crate::error::{PublishError, RepositoryError};
use crate::events::BookingEvent;
use crate::types::{Booking, BookingId, ParticipantId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// Bookings kept in a map, with revision checks on save.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBookingRepository {
    bookings: Arc<RwLock<HashMap<BookingId, Booking>>>,
}

impl InMemoryBookingRepository {
    /// Empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored bookings
    pub async fn len(&self) -> usize {
        self.bookings.read().await.len()
    }

    /// True when nothing is stored
    pub async fn is_empty(&self) -> bool {
        self.bookings.read().await.is_empty()
    }
}

impl BookingRepository for InMemoryBookingRepository {
    fn load(&self, id: BookingId) -> BoxFuture<'_, Result<Booking, RepositoryError>> {
        Box::pin(async move {
            self.bookings
                .read()
                .await
                .get(&id)
                .cloned()
                .ok_or(RepositoryError::NotFound(id))
        })
    }

    fn insert(&self, booking: Booking) -> BoxFuture<'_, Result<(), RepositoryError>> {
        Box::pin(async move {
            let mut bookings = self.bookings.write().await;
            if bookings.contains_key(&booking.id) {
                return Err(RepositoryError::AlreadyExists(booking.id));
            }
            bookings.insert(booking.id, booking);
            Ok(())
        })
    }

    fn save(
        &self,
        booking: Booking,
        expected_revision: u64,
    ) -> BoxFuture<'_, Result<(), RepositoryError>> {
        Box::pin(async move {
            let mut bookings = self.bookings.write().await;
            let current = bookings
                .get(&booking.id)
                .ok_or(RepositoryError::NotFound(booking.id))?;
            if current.revision != expected_revision {
                return Err(RepositoryError::Conflict {
                    expected: expected_revision,
                    actual: current.revision,
                });
            }
            bookings.insert(booking.id, booking);
            Ok(())
        })
    }

    fn list_for(
        &self,
        participant: ParticipantId,
    ) -> BoxFuture<'_, Result<Vec<Booking>, RepositoryError>> {
        Box::pin(async move {
            let mut found: Vec<Booking> = self
                .bookings
                .read()
                .await
                .values()
                .filter(|b| b.role_of(participant).is_some())
                .cloned()
                .collect();
            found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(found)
        })
    }
}

/// Publisher that remembers every event, or refuses them all.
#[derive(Debug, Default, Clone)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<BookingEvent>>>,
    failing: bool,
}

impl RecordingPublisher {
    /// Publisher that records
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publisher whose every call fails
    #[must_use]
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Events recorded so far, oldest first
    #[must_use]
    pub fn events(&self) -> Vec<BookingEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: BookingEvent) -> BoxFuture<'_, Result<(), PublishError>> {
        Box::pin(async move {
            if self.failing {
                return Err(PublishError("publisher is unavailable".to_string()));
            }
            self.events
                .lock()
                .map_err(|_| PublishError("recorder poisoned".to_string()))?
                .push(event);
            Ok(())
        })
    }
}
