//! Message thread and post-completion ratings.

use crate::error::BookingError;
use crate::types::{
    Booking, BookingMessage, BookingRating, BookingStatus, MessageId, ParticipantId, RatingId,
};
use chrono::{DateTime, Utc};

/// Lowest accepted rating
pub const MIN_RATING: i32 = 1;
/// Highest accepted rating
pub const MAX_RATING: i32 = 5;

/// Append a message to the booking's thread.
///
/// The text is stored trimmed. The timestamp never goes backwards relative to
/// the previous message, so a lagging clock cannot reorder the thread.
///
/// # Errors
///
/// [`BookingError::EmptyMessage`] if `text` is blank.
pub fn add_message(
    booking: &mut Booking,
    sender: ParticipantId,
    text: &str,
    now: DateTime<Utc>,
) -> Result<BookingMessage, BookingError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(BookingError::EmptyMessage);
    }

    let timestamp = booking
        .messages
        .last()
        .map_or(now, |last| last.timestamp.max(now));

    let message = BookingMessage {
        id: MessageId::new(),
        sender,
        text: text.to_string(),
        timestamp,
    };
    booking.messages.push(message.clone());
    booking.updated_at = now;
    Ok(message)
}

/// Record `rater`'s rating of a completed booking.
///
/// # Errors
///
/// Checked in order: [`BookingError::NotCompleted`],
/// [`BookingError::DuplicateRating`], [`BookingError::InvalidRatingValue`].
pub fn add_rating(
    booking: &mut Booking,
    rater: ParticipantId,
    rating: i32,
    comment: Option<String>,
    now: DateTime<Utc>,
) -> Result<BookingRating, BookingError> {
    if booking.status != BookingStatus::Completed {
        return Err(BookingError::NotCompleted {
            status: booking.status,
        });
    }
    if booking.rating_by(rater).is_some() {
        return Err(BookingError::DuplicateRating(rater));
    }
    let value = u8::try_from(rating)
        .ok()
        .filter(|_| (MIN_RATING..=MAX_RATING).contains(&rating))
        .ok_or(BookingError::InvalidRatingValue(rating))?;

    let rating = BookingRating {
        id: RatingId::new(),
        rater,
        rating: value,
        comment: comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()),
        created_at: now,
    };
    booking.ratings.push(rating.clone());
    booking.updated_at = now;
    Ok(rating)
}

/// Whether `rater` may still rate this booking
#[must_use]
pub fn can_rate(booking: &Booking, rater: ParticipantId) -> bool {
    booking.status == BookingStatus::Completed && booking.rating_by(rater).is_none()
}
