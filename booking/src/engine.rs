//! Store-backed booking services.
//!
//! Each write loads the booking, applies a pure rule from [`crate::lifecycle`]
//! or [`crate::thread`], and saves with an optimistic revision check. A
//! conflicting save reloads and re-validates, so a racing change shows up as
//! a validation error rather than a lost update. Events are published only
//! after the store accepted the write.

use crate::environment::BookingEnvironment;
use crate::error::{BookingError, RepositoryError};
use crate::events::BookingEvent;
use crate::lifecycle::{self, StatusChanged};
use crate::stats::BookingStats;
use crate::thread;
use crate::types::{
    Booking, BookingId, BookingMessage, BookingRating, BookingStatus, NewBooking, ParticipantId,
    Role,
};
use bookwell_runtime::retry::retry_with_predicate;
use chrono::{DateTime, Utc};
use std::fmt;

/// Outcome of one load-apply-save round.
enum Attempt {
    Conflict { expected: u64, actual: u64 },
    Rejected(BookingError),
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict { expected, actual } => {
                write!(f, "revision conflict (expected {expected}, found {actual})")
            },
            Self::Rejected(err) => write!(f, "{err}"),
        }
    }
}

async fn attempt<T, F>(
    env: &BookingEnvironment,
    id: BookingId,
    apply: &F,
) -> Result<(Booking, T), Attempt>
where
    T: Send,
    F: Fn(&mut Booking, DateTime<Utc>) -> Result<T, BookingError> + Sync,
{
    let mut booking = env
        .repository
        .load(id)
        .await
        .map_err(|e| Attempt::Rejected(e.into()))?;
    let expected = booking.revision;
    let now = env.clock.now();

    let outcome = apply(&mut booking, now).map_err(Attempt::Rejected)?;
    booking.revision = expected + 1;
    booking.updated_at = now;

    match env.repository.save(booking.clone(), expected).await {
        Ok(()) => Ok((booking, outcome)),
        Err(RepositoryError::Conflict { expected, actual }) => {
            Err(Attempt::Conflict { expected, actual })
        },
        Err(e) => Err(Attempt::Rejected(e.into())),
    }
}

async fn mutate<T, F>(
    env: &BookingEnvironment,
    id: BookingId,
    apply: F,
) -> Result<(Booking, T), BookingError>
where
    T: Send,
    F: Fn(&mut Booking, DateTime<Utc>) -> Result<T, BookingError> + Sync,
{
    let apply = &apply;
    retry_with_predicate(
        env.conflict_retry.clone(),
        move || attempt(env, id, apply),
        |err: &Attempt| matches!(err, Attempt::Conflict { .. }),
    )
    .await
    .map_err(|err| match err {
        Attempt::Rejected(err) => err,
        conflict @ Attempt::Conflict { .. } => BookingError::Store(conflict.to_string()),
    })
}

async fn publish(env: &BookingEnvironment, event: BookingEvent) {
    let kind = event.kind();
    let booking_id = event.booking_id();
    match env.publisher.publish(event).await {
        Ok(()) => {
            tracing::debug!(%booking_id, kind, "Published booking event");
            metrics::counter!("bookwell_events_published_total", "kind" => kind).increment(1);
        },
        Err(e) => {
            tracing::warn!(%booking_id, kind, error = %e, "Failed to publish booking event");
            metrics::counter!("bookwell_events_publish_failures_total", "kind" => kind)
                .increment(1);
        },
    }
}

/// Creates bookings and moves them through the lifecycle.
#[derive(Clone, Debug)]
pub struct LifecycleEngine {
    env: BookingEnvironment,
}

impl LifecycleEngine {
    /// Create an engine over `env`
    #[must_use]
    pub const fn new(env: BookingEnvironment) -> Self {
        Self { env }
    }

    /// Access the environment
    #[must_use]
    pub const fn environment(&self) -> &BookingEnvironment {
        &self.env
    }

    /// Store a new `pending` booking and announce it.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidBooking`] when the requester books themselves or
    /// the time window is empty; store failures otherwise.
    #[tracing::instrument(skip(self, draft), fields(requester = %draft.requester, fulfiller = %draft.fulfiller))]
    pub async fn create(&self, draft: NewBooking) -> Result<Booking, BookingError> {
        if draft.requester == draft.fulfiller {
            return Err(BookingError::InvalidBooking(
                "requester and fulfiller must differ".to_string(),
            ));
        }
        if draft.schedule.end <= draft.schedule.start {
            return Err(BookingError::InvalidBooking(
                "time window must end after it starts".to_string(),
            ));
        }

        let booking = Booking::new(BookingId::new(), draft, self.env.clock.now());
        self.env.repository.insert(booking.clone()).await?;

        tracing::info!(booking_id = %booking.id, "Booking requested");
        metrics::counter!("bookwell_bookings_created_total").increment(1);

        publish(&self.env, BookingEvent::created(&booking)).await;
        Ok(booking)
    }

    /// Current version of a booking.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] or a store failure.
    pub async fn load(&self, id: BookingId) -> Result<Booking, BookingError> {
        Ok(self.env.repository.load(id).await?)
    }

    /// Bookings `participant` is a party to, newest first.
    ///
    /// # Errors
    ///
    /// A store failure.
    pub async fn list_for(&self, participant: ParticipantId) -> Result<Vec<Booking>, BookingError> {
        Ok(self.env.repository.list_for(participant).await?)
    }

    /// Per-status summary of `participant`'s bookings.
    ///
    /// # Errors
    ///
    /// A store failure.
    pub async fn stats_for(&self, participant: ParticipantId) -> Result<BookingStats, BookingError> {
        let bookings = self.env.repository.list_for(participant).await?;
        Ok(BookingStats::from_bookings(bookings))
    }

    /// Move a booking to `target` on behalf of `role`.
    ///
    /// Returns the saved booking and the applied change.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidTransition`] or [`BookingError::Unauthorized`]
    /// from the rules; [`BookingError::NotFound`],
    /// [`BookingError::CredentialExpired`] or [`BookingError::Store`] from the
    /// store.
    #[tracing::instrument(skip(self, reason))]
    pub async fn request_transition(
        &self,
        booking_id: BookingId,
        role: Role,
        target: BookingStatus,
        reason: Option<String>,
    ) -> Result<(Booking, StatusChanged), BookingError> {
        let (booking, change) = mutate(&self.env, booking_id, |booking, now| {
            lifecycle::request_transition(booking, role, target, reason.clone(), now)
        })
        .await
        .inspect_err(|e| {
            if e.is_validation() {
                tracing::debug!(error = %e, "Transition rejected");
            }
        })?;

        tracing::info!(from = %change.from, to = %change.to, "Booking status changed");
        metrics::counter!("bookwell_transitions_total", "to" => change.to.as_str()).increment(1);

        publish(
            &self.env,
            BookingEvent::StatusChanged {
                parties: booking.parties(),
                change: change.clone(),
            },
        )
        .await;
        Ok((booking, change))
    }
}

/// Message thread and ratings of a booking.
#[derive(Clone, Debug)]
pub struct BookingThread {
    env: BookingEnvironment,
}

impl BookingThread {
    /// Create a thread service over `env`
    #[must_use]
    pub const fn new(env: BookingEnvironment) -> Self {
        Self { env }
    }

    /// Append a message from `sender`.
    ///
    /// # Errors
    ///
    /// [`BookingError::EmptyMessage`] for blank text, or a store failure.
    #[tracing::instrument(skip(self, text))]
    pub async fn add_message(
        &self,
        booking_id: BookingId,
        sender: ParticipantId,
        text: &str,
    ) -> Result<BookingMessage, BookingError> {
        if text.trim().is_empty() {
            return Err(BookingError::EmptyMessage);
        }

        let (booking, message) = mutate(&self.env, booking_id, |booking, now| {
            thread::add_message(booking, sender, text, now)
        })
        .await?;

        tracing::debug!(message_id = %message.id, "Message posted");
        metrics::counter!("bookwell_messages_total").increment(1);

        publish(
            &self.env,
            BookingEvent::MessagePosted {
                booking_id,
                parties: booking.parties(),
                message: message.clone(),
            },
        )
        .await;
        Ok(message)
    }

    /// Record `rater`'s rating of a completed booking.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotCompleted`], [`BookingError::DuplicateRating`],
    /// [`BookingError::InvalidRatingValue`], or a store failure.
    #[tracing::instrument(skip(self, comment))]
    pub async fn add_rating(
        &self,
        booking_id: BookingId,
        rater: ParticipantId,
        rating: i32,
        comment: Option<String>,
    ) -> Result<BookingRating, BookingError> {
        let (booking, rating) = mutate(&self.env, booking_id, |booking, now| {
            thread::add_rating(booking, rater, rating, comment.clone(), now)
        })
        .await?;

        tracing::info!(rating = rating.rating, "Booking rated");
        metrics::counter!("bookwell_ratings_total").increment(1);

        publish(
            &self.env,
            BookingEvent::RatingSubmitted {
                booking_id,
                parties: booking.parties(),
                rating: rating.clone(),
            },
        )
        .await;
        Ok(rating)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::environment::{BookingRepository, BoxFuture};
    use crate::memory::{InMemoryBookingRepository, RecordingPublisher};
    use crate::test_support::{at, booking_in, draft};
    use bookwell_runtime::RetryPolicy;
    use bookwell_testing::mocks::FixedClock;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn env_with(
        repository: Arc<dyn BookingRepository>,
        publisher: Arc<RecordingPublisher>,
    ) -> BookingEnvironment {
        BookingEnvironment::new(repository, publisher)
            .with_clock(Arc::new(FixedClock::new(at(60))))
            .with_conflict_retry(RetryPolicy::fixed(3, Duration::ZERO))
    }

    async fn seeded(status: BookingStatus) -> (Arc<InMemoryBookingRepository>, Booking) {
        let repository = Arc::new(InMemoryBookingRepository::new());
        let booking = booking_in(status);
        repository.insert(booking.clone()).await.unwrap();
        (repository, booking)
    }

    #[tokio::test]
    async fn create_stores_pending_and_announces() {
        let repository = Arc::new(InMemoryBookingRepository::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let engine = LifecycleEngine::new(env_with(repository.clone(), publisher.clone()));

        let booking = engine.create(draft()).await.unwrap();

        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.timeline.requested_at, at(60));
        assert_eq!(engine.load(booking.id).await.unwrap(), booking);
        let events = publisher.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "created");
    }

    #[tokio::test]
    async fn create_rejects_self_booking() {
        let repository = Arc::new(InMemoryBookingRepository::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let engine = LifecycleEngine::new(env_with(repository.clone(), publisher.clone()));

        let mut input = draft();
        input.fulfiller = input.requester;

        assert!(matches!(
            engine.create(input).await,
            Err(BookingError::InvalidBooking(_))
        ));
        assert!(repository.is_empty().await);
        assert!(publisher.events().is_empty());
    }

    #[tokio::test]
    async fn transition_persists_and_publishes() {
        let (repository, booking) = seeded(BookingStatus::Pending).await;
        let publisher = Arc::new(RecordingPublisher::new());
        let engine = LifecycleEngine::new(env_with(repository.clone(), publisher.clone()));

        let (saved, change) = engine
            .request_transition(booking.id, Role::Fulfiller, BookingStatus::Accepted, None)
            .await
            .unwrap();

        assert_eq!(saved.status, BookingStatus::Accepted);
        assert_eq!(saved.revision, booking.revision + 1);
        assert_eq!(saved.timeline.accepted_at, Some(at(60)));
        assert_eq!(change.from, BookingStatus::Pending);

        let stored = repository.load(booking.id).await.unwrap();
        assert_eq!(stored, saved);
        assert!(matches!(
            publisher.events().as_slice(),
            [BookingEvent::StatusChanged { change: c, .. }] if c.to == BookingStatus::Accepted
        ));
    }

    #[tokio::test]
    async fn rejected_transition_changes_nothing() {
        let (repository, booking) = seeded(BookingStatus::Pending).await;
        let publisher = Arc::new(RecordingPublisher::new());
        let engine = LifecycleEngine::new(env_with(repository.clone(), publisher.clone()));

        let err = engine
            .request_transition(booking.id, Role::Requester, BookingStatus::Accepted, None)
            .await
            .unwrap_err();

        assert_eq!(err.code(), "UNAUTHORIZED");
        assert_eq!(repository.load(booking.id).await.unwrap(), booking);
        assert!(publisher.events().is_empty());
    }

    #[tokio::test]
    async fn unknown_booking_is_not_found() {
        let repository = Arc::new(InMemoryBookingRepository::new());
        let engine = LifecycleEngine::new(env_with(repository, Arc::new(RecordingPublisher::new())));
        let id = BookingId::new();

        assert_eq!(
            engine
                .request_transition(id, Role::Fulfiller, BookingStatus::Accepted, None)
                .await
                .unwrap_err(),
            BookingError::NotFound(id)
        );
    }

    #[tokio::test]
    async fn stats_cover_only_the_callers_bookings() {
        let repository = Arc::new(InMemoryBookingRepository::new());
        let engine = LifecycleEngine::new(env_with(
            repository.clone(),
            Arc::new(RecordingPublisher::new()),
        ));
        let mine = engine.create(draft()).await.unwrap();
        engine.create(draft()).await.unwrap();
        engine
            .request_transition(mine.id, Role::Fulfiller, BookingStatus::Accepted, None)
            .await
            .unwrap();

        let listed = engine.list_for(mine.requester).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, BookingStatus::Accepted);

        let stats = engine.stats_for(mine.fulfiller).await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.by_status.len(), 1);
        assert_eq!(stats.by_status[0].status, BookingStatus::Accepted);
        assert_eq!(stats.recent[0].id, mine.id);
    }

    #[tokio::test]
    async fn publish_failure_does_not_fail_the_write() {
        let (repository, booking) = seeded(BookingStatus::Accepted).await;
        let publisher = Arc::new(RecordingPublisher::failing());
        let engine = LifecycleEngine::new(env_with(repository.clone(), publisher));

        engine
            .request_transition(booking.id, Role::Fulfiller, BookingStatus::InProgress, None)
            .await
            .unwrap();

        assert_eq!(
            repository.load(booking.id).await.unwrap().status,
            BookingStatus::InProgress
        );
    }

    /// Lets a rival transition land between our load and our save, once.
    struct RacingRepository {
        inner: Arc<InMemoryBookingRepository>,
        rival: BookingStatus,
        raced: AtomicBool,
    }

    impl BookingRepository for RacingRepository {
        fn load(&self, id: BookingId) -> BoxFuture<'_, Result<Booking, RepositoryError>> {
            self.inner.load(id)
        }

        fn insert(&self, booking: Booking) -> BoxFuture<'_, Result<(), RepositoryError>> {
            self.inner.insert(booking)
        }

        fn save(
            &self,
            booking: Booking,
            expected_revision: u64,
        ) -> BoxFuture<'_, Result<(), RepositoryError>> {
            Box::pin(async move {
                if !self.raced.swap(true, Ordering::SeqCst) {
                    let mut rival = self.inner.load(booking.id).await?;
                    let revision = rival.revision;
                    lifecycle::request_transition(&mut rival, Role::Requester, self.rival, None, at(30))
                        .map_err(|e| RepositoryError::Unavailable(e.to_string()))?;
                    rival.revision += 1;
                    self.inner.save(rival, revision).await?;
                }
                self.inner.save(booking, expected_revision).await
            })
        }

        fn list_for(
            &self,
            participant: ParticipantId,
        ) -> BoxFuture<'_, Result<Vec<Booking>, RepositoryError>> {
            self.inner.list_for(participant)
        }
    }

    #[tokio::test]
    async fn racing_write_is_revalidated() {
        let (inner, booking) = seeded(BookingStatus::Pending).await;
        let repository = Arc::new(RacingRepository {
            inner: inner.clone(),
            rival: BookingStatus::Cancelled,
            raced: AtomicBool::new(false),
        });
        let publisher = Arc::new(RecordingPublisher::new());
        let engine = LifecycleEngine::new(env_with(repository, publisher.clone()));

        let err = engine
            .request_transition(booking.id, Role::Fulfiller, BookingStatus::Accepted, None)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            BookingError::InvalidTransition {
                from: BookingStatus::Cancelled,
                to: BookingStatus::Accepted
            }
        );
        assert_eq!(
            inner.load(booking.id).await.unwrap().status,
            BookingStatus::Cancelled
        );
        assert!(publisher.events().is_empty());
    }

    #[tokio::test]
    async fn racing_message_is_retried_on_fresh_revision() {
        let (inner, booking) = seeded(BookingStatus::Accepted).await;
        let repository = Arc::new(RacingRepository {
            inner: inner.clone(),
            rival: BookingStatus::InProgress,
            raced: AtomicBool::new(false),
        });
        let thread = BookingThread::new(env_with(repository, Arc::new(RecordingPublisher::new())));

        thread
            .add_message(booking.id, booking.requester, "running late")
            .await
            .unwrap();

        let stored = inner.load(booking.id).await.unwrap();
        assert_eq!(stored.status, BookingStatus::InProgress);
        assert_eq!(stored.messages.len(), 1);
        assert_eq!(stored.revision, booking.revision + 2);
    }

    #[tokio::test]
    async fn thread_operations_persist_and_publish() {
        let (repository, booking) = seeded(BookingStatus::Completed).await;
        let publisher = Arc::new(RecordingPublisher::new());
        let thread = BookingThread::new(env_with(repository.clone(), publisher.clone()));

        let message = thread
            .add_message(booking.id, booking.fulfiller, " thanks! ")
            .await
            .unwrap();
        assert_eq!(message.text, "thanks!");

        let rating = thread
            .add_rating(booking.id, booking.requester, 5, Some("spotless".into()))
            .await
            .unwrap();
        assert_eq!(rating.rating, 5);

        assert_eq!(
            thread
                .add_rating(booking.id, booking.requester, 4, None)
                .await
                .unwrap_err(),
            BookingError::DuplicateRating(booking.requester)
        );

        let stored = repository.load(booking.id).await.unwrap();
        assert_eq!(stored.messages.len(), 1);
        assert_eq!(stored.ratings.len(), 1);
        let kinds: Vec<_> = publisher.events().iter().map(BookingEvent::kind).collect();
        assert_eq!(kinds, ["message_posted", "rating_submitted"]);
    }

    #[tokio::test]
    async fn blank_message_skips_the_store() {
        let repository = Arc::new(InMemoryBookingRepository::new());
        let thread = BookingThread::new(env_with(repository, Arc::new(RecordingPublisher::new())));

        assert_eq!(
            thread
                .add_message(BookingId::new(), ParticipantId::new(), "   ")
                .await
                .unwrap_err(),
            BookingError::EmptyMessage
        );
    }
}
