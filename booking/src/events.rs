//! Domain events emitted after a successful write.

use crate::lifecycle::StatusChanged;
use crate::types::{
    Booking, BookingId, BookingMessage, BookingRating, GeoPoint, Parties, Schedule, ServiceId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events published by the engine once the store has accepted a change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingEvent {
    /// A new booking was requested
    Created {
        booking_id: BookingId,
        parties: Parties,
        service: ServiceId,
        schedule: Schedule,
        point: GeoPoint,
        at: DateTime<Utc>,
    },
    /// The status moved along the matrix
    StatusChanged {
        parties: Parties,
        #[serde(flatten)]
        change: StatusChanged,
    },
    /// A participant wrote in the thread
    MessagePosted {
        booking_id: BookingId,
        parties: Parties,
        message: BookingMessage,
    },
    /// A participant rated the booking
    RatingSubmitted {
        booking_id: BookingId,
        parties: Parties,
        rating: BookingRating,
    },
}

impl BookingEvent {
    /// Event for a freshly created booking
    #[must_use]
    pub fn created(booking: &Booking) -> Self {
        Self::Created {
            booking_id: booking.id,
            parties: booking.parties(),
            service: booking.service,
            schedule: booking.schedule.clone(),
            point: booking.location.point,
            at: booking.created_at,
        }
    }

    /// Booking the event belongs to
    #[must_use]
    pub const fn booking_id(&self) -> BookingId {
        match self {
            Self::Created { booking_id, .. }
            | Self::MessagePosted { booking_id, .. }
            | Self::RatingSubmitted { booking_id, .. } => *booking_id,
            Self::StatusChanged { change, .. } => change.booking_id,
        }
    }

    /// Participants who should hear about it
    #[must_use]
    pub const fn parties(&self) -> Parties {
        match self {
            Self::Created { parties, .. }
            | Self::StatusChanged { parties, .. }
            | Self::MessagePosted { parties, .. }
            | Self::RatingSubmitted { parties, .. } => *parties,
        }
    }

    /// Short name for logs and metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::StatusChanged { .. } => "status_changed",
            Self::MessagePosted { .. } => "message_posted",
            Self::RatingSubmitted { .. } => "rating_submitted",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::{at, booking_in};
    use crate::types::{BookingStatus, Role};

    #[test]
    fn status_change_serializes_flat() {
        let booking = booking_in(BookingStatus::Pending);
        let event = BookingEvent::StatusChanged {
            parties: booking.parties(),
            change: StatusChanged {
                booking_id: booking.id,
                from: BookingStatus::Pending,
                to: BookingStatus::Accepted,
                actor: Role::Fulfiller,
                reason: None,
                at: at(1),
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_changed");
        assert_eq!(json["from"], "pending");
        assert_eq!(json["to"], "accepted");
        assert_eq!(json["actor"], "fulfiller");
        assert_eq!(event.booking_id(), booking.id);
        assert_eq!(event.kind(), "status_changed");
    }

    #[test]
    fn created_carries_parties_and_point() {
        let booking = booking_in(BookingStatus::Pending);
        let event = BookingEvent::created(&booking);
        assert_eq!(event.parties(), booking.parties());
        assert!(matches!(event, BookingEvent::Created { point, .. } if point == booking.location.point));
    }
}
