//! Dashboard summary of a participant's bookings.

use crate::types::{Booking, BookingStatus};
use serde::{Deserialize, Serialize};

/// Bookings carried in [`BookingStats::recent`]
pub const RECENT_LIMIT: usize = 5;

/// Count and value of the bookings in one status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTally {
    pub status: BookingStatus,
    pub count: usize,
    /// Final amounts where known, quotes otherwise
    pub total_cents: u64,
}

/// Totals and the latest few bookings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BookingStats {
    pub total: usize,
    /// Only statuses that occur, in lifecycle order
    pub by_status: Vec<StatusTally>,
    /// Newest first
    pub recent: Vec<Booking>,
}

impl BookingStats {
    /// Summarize `bookings`.
    #[must_use]
    pub fn from_bookings(mut bookings: Vec<Booking>) -> Self {
        let by_status = BookingStatus::ALL
            .into_iter()
            .filter_map(|status| {
                let (count, total_cents) = bookings
                    .iter()
                    .filter(|b| b.status == status)
                    .fold((0, 0_u64), |(count, total), b| {
                        let amount = b.pricing.final_cents.unwrap_or(b.pricing.quoted_cents);
                        (count + 1, total.saturating_add(amount))
                    });
                (count > 0).then_some(StatusTally {
                    status,
                    count,
                    total_cents,
                })
            })
            .collect();

        let total = bookings.len();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bookings.truncate(RECENT_LIMIT);

        Self {
            total,
            by_status,
            recent: bookings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, booking_in};

    #[test]
    fn empty_history_has_no_tallies() {
        assert_eq!(BookingStats::from_bookings(Vec::new()), BookingStats::default());
    }

    #[test]
    fn tallies_follow_lifecycle_order_and_prefer_final_amount() {
        let mut done = booking_in(BookingStatus::Completed);
        done.pricing.final_cents = Some(15_000);
        let bookings = vec![
            done,
            booking_in(BookingStatus::Pending),
            booking_in(BookingStatus::Pending),
        ];

        let stats = BookingStats::from_bookings(bookings);

        assert_eq!(stats.total, 3);
        assert_eq!(
            stats.by_status,
            vec![
                StatusTally {
                    status: BookingStatus::Pending,
                    count: 2,
                    total_cents: 24_000,
                },
                StatusTally {
                    status: BookingStatus::Completed,
                    count: 1,
                    total_cents: 15_000,
                },
            ]
        );
    }

    #[test]
    fn recent_keeps_the_five_newest() {
        let bookings: Vec<Booking> = (0..7)
            .map(|i| {
                let mut booking = booking_in(BookingStatus::Pending);
                booking.created_at = at(i);
                booking
            })
            .collect();
        let expected: Vec<_> = bookings.iter().rev().take(5).map(|b| b.id).collect();

        let stats = BookingStats::from_bookings(bookings);

        assert_eq!(stats.total, 7);
        assert_eq!(stats.recent.iter().map(|b| b.id).collect::<Vec<_>>(), expected);
    }
}
