//! Domain types for bookings.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a booking
    BookingId
);
uuid_id!(
    /// Unique identifier for a participant (either side of a booking)
    ParticipantId
);
uuid_id!(
    /// Identifier of the service being booked (owned by the catalog)
    ServiceId
);
uuid_id!(
    /// Unique identifier for a thread message
    MessageId
);
uuid_id!(
    /// Unique identifier for a rating
    RatingId
);

/// Which side of a booking an actor is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Asks for the service
    Requester,
    /// Delivers the service
    Fulfiller,
}

impl Role {
    /// The other side of the booking
    #[must_use]
    pub const fn counterpart(self) -> Self {
        match self {
            Self::Requester => Self::Fulfiller,
            Self::Fulfiller => Self::Requester,
        }
    }

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requester => "requester",
            Self::Fulfiller => "fulfiller",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    /// Requested, waiting for the fulfiller
    Pending,
    /// Fulfiller agreed
    Accepted,
    /// Fulfiller declined
    Rejected,
    /// Work has started
    InProgress,
    /// Work is done
    Completed,
    /// Called off by either side
    Cancelled,
    /// Outcome contested
    Disputed,
}

impl BookingStatus {
    /// Every status, in lifecycle order
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::Accepted,
        Self::Rejected,
        Self::InProgress,
        Self::Completed,
        Self::Cancelled,
        Self::Disputed,
    ];

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Disputed => "disputed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown booking status '{s}'"))
    }
}

/// Requested date and time window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Day of the engagement
    pub date: NaiveDate,
    /// Start of the window
    pub start: NaiveTime,
    /// End of the window
    pub end: NaiveTime,
}

/// WGS84 coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lng: f64,
}

/// Where the service is delivered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Coordinates
    pub point: GeoPoint,
    /// Street address
    pub address: String,
    /// Access notes, floor, gate code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Settlement state reported by the payment side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Nothing collected yet
    #[default]
    Pending,
    /// Collected
    Paid,
    /// Returned to the requester
    Refunded,
}

/// Price information, in minor currency units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    /// Amount quoted at request time
    pub quoted_cents: u64,
    /// Amount actually charged, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_cents: Option<u64>,
    /// Settlement state
    #[serde(default)]
    pub payment_status: PaymentStatus,
}

/// One timestamp per status, each set once when the status is entered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub disputed_at: Option<DateTime<Utc>>,
}

impl Timeline {
    /// Timeline of a booking requested at `at`
    #[must_use]
    pub const fn requested(at: DateTime<Utc>) -> Self {
        Self {
            requested_at: at,
            accepted_at: None,
            rejected_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            disputed_at: None,
        }
    }

    fn slot(&mut self, status: BookingStatus) -> Option<&mut Option<DateTime<Utc>>> {
        match status {
            BookingStatus::Pending => None,
            BookingStatus::Accepted => Some(&mut self.accepted_at),
            BookingStatus::Rejected => Some(&mut self.rejected_at),
            BookingStatus::InProgress => Some(&mut self.started_at),
            BookingStatus::Completed => Some(&mut self.completed_at),
            BookingStatus::Cancelled => Some(&mut self.cancelled_at),
            BookingStatus::Disputed => Some(&mut self.disputed_at),
        }
    }

    /// Record entry into `status`. Returns `false` if already recorded.
    pub fn stamp(&mut self, status: BookingStatus, at: DateTime<Utc>) -> bool {
        match self.slot(status) {
            Some(slot @ None) => {
                *slot = Some(at);
                true
            },
            _ => false,
        }
    }

    /// When `status` was entered, if ever
    #[must_use]
    pub const fn entered_at(&self, status: BookingStatus) -> Option<DateTime<Utc>> {
        match status {
            BookingStatus::Pending => Some(self.requested_at),
            BookingStatus::Accepted => self.accepted_at,
            BookingStatus::Rejected => self.rejected_at,
            BookingStatus::InProgress => self.started_at,
            BookingStatus::Completed => self.completed_at,
            BookingStatus::Cancelled => self.cancelled_at,
            BookingStatus::Disputed => self.disputed_at,
        }
    }
}

/// A message in a booking's thread. Never edited or removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingMessage {
    pub id: MessageId,
    pub sender: ParticipantId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// A post-completion rating. At most one per rater.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRating {
    pub id: RatingId,
    pub rater: ParticipantId,
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The two participants of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parties {
    pub requester: ParticipantId,
    pub fulfiller: ParticipantId,
}

impl Parties {
    /// The participant holding `role`
    #[must_use]
    pub const fn get(&self, role: Role) -> ParticipantId {
        match role {
            Role::Requester => self.requester,
            Role::Fulfiller => self.fulfiller,
        }
    }

    /// The role `participant` holds, if any
    #[must_use]
    pub fn role_of(&self, participant: ParticipantId) -> Option<Role> {
        if participant == self.requester {
            Some(Role::Requester)
        } else if participant == self.fulfiller {
            Some(Role::Fulfiller)
        } else {
            None
        }
    }
}

/// Input for creating a booking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewBooking {
    pub requester: ParticipantId,
    pub fulfiller: ParticipantId,
    pub service: ServiceId,
    pub schedule: Schedule,
    pub location: Location,
    pub quoted_cents: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
}

/// A single engagement between a requester and a fulfiller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub requester: ParticipantId,
    pub fulfiller: ParticipantId,
    pub service: ServiceId,
    pub status: BookingStatus,
    pub schedule: Schedule,
    pub location: Location,
    pub pricing: Pricing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
    pub timeline: Timeline,
    #[serde(default)]
    pub messages: Vec<BookingMessage>,
    #[serde(default)]
    pub ratings: Vec<BookingRating>,
    /// Bumped on every persisted mutation
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// A freshly requested booking in `pending`
    #[must_use]
    pub fn new(id: BookingId, draft: NewBooking, at: DateTime<Utc>) -> Self {
        Self {
            id,
            requester: draft.requester,
            fulfiller: draft.fulfiller,
            service: draft.service,
            status: BookingStatus::Pending,
            schedule: draft.schedule,
            location: draft.location,
            pricing: Pricing {
                quoted_cents: draft.quoted_cents,
                final_cents: None,
                payment_status: PaymentStatus::Pending,
            },
            requirements: draft
                .requirements
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
            timeline: Timeline::requested(at),
            messages: Vec::new(),
            ratings: Vec::new(),
            revision: 0,
            created_at: at,
            updated_at: at,
        }
    }

    /// Both participants
    #[must_use]
    pub const fn parties(&self) -> Parties {
        Parties {
            requester: self.requester,
            fulfiller: self.fulfiller,
        }
    }

    /// The role `participant` holds on this booking, if any
    #[must_use]
    pub fn role_of(&self, participant: ParticipantId) -> Option<Role> {
        self.parties().role_of(participant)
    }

    /// The rating left by `rater`, if any
    #[must_use]
    pub fn rating_by(&self, rater: ParticipantId) -> Option<&BookingRating> {
        self.ratings.iter().find(|r| r.rater == rater)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_string(&BookingStatus::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
        let parsed: BookingStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(parsed, BookingStatus::Cancelled);
    }

    #[test]
    fn status_from_str_matches_wire_names() {
        for status in BookingStatus::ALL {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), status);
        }
        assert!("in_progress".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn timeline_stamps_once() {
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let mut timeline = Timeline::requested(t0);

        assert!(timeline.stamp(BookingStatus::Accepted, t1));
        assert!(!timeline.stamp(BookingStatus::Accepted, t0));
        assert_eq!(timeline.entered_at(BookingStatus::Accepted), Some(t1));
        assert!(!timeline.stamp(BookingStatus::Pending, t1));
        assert_eq!(timeline.entered_at(BookingStatus::Pending), Some(t0));
    }

    #[test]
    fn parties_resolve_roles() {
        let parties = Parties {
            requester: ParticipantId::new(),
            fulfiller: ParticipantId::new(),
        };
        assert_eq!(parties.role_of(parties.requester), Some(Role::Requester));
        assert_eq!(parties.role_of(parties.fulfiller), Some(Role::Fulfiller));
        assert_eq!(parties.role_of(ParticipantId::new()), None);
        assert_eq!(parties.get(Role::Fulfiller), parties.fulfiller);
        assert_eq!(Role::Requester.counterpart(), Role::Fulfiller);
    }

    #[test]
    fn ids_round_trip_through_strings() {
        let id = BookingId::new();
        assert_eq!(id.to_string().parse::<BookingId>().unwrap(), id);
    }
}
