//! Status transitions with role policy.
//!
//! Everything here is pure: callers supply the booking and the current time,
//! persistence happens in [`crate::engine`].

use crate::error::BookingError;
use crate::matrix::TransitionMatrix;
use crate::types::{Booking, BookingId, BookingStatus, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record of an applied status change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub booking_id: BookingId,
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub actor: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Role gate applied on top of matrix legality.
///
/// Accepting and rejecting belong to the fulfiller; withdrawing a pending
/// request belongs to the requester. Every other legal edge is open to both
/// sides.
#[must_use]
pub const fn role_permits(from: BookingStatus, to: BookingStatus, role: Role) -> bool {
    match (from, to) {
        (_, BookingStatus::Accepted | BookingStatus::Rejected) => {
            matches!(role, Role::Fulfiller)
        },
        (BookingStatus::Pending, BookingStatus::Cancelled) => matches!(role, Role::Requester),
        _ => true,
    }
}

/// Check a transition without applying it.
///
/// # Errors
///
/// [`BookingError::InvalidTransition`] when the edge is not in the matrix,
/// then [`BookingError::Unauthorized`] when the role may not take it.
pub fn check_transition(
    from: BookingStatus,
    to: BookingStatus,
    role: Role,
) -> Result<(), BookingError> {
    if !TransitionMatrix::is_legal(from, to) {
        return Err(BookingError::InvalidTransition { from, to });
    }
    if !role_permits(from, to, role) {
        return Err(BookingError::Unauthorized { role, from, to });
    }
    Ok(())
}

/// Move `booking` to `target` on behalf of `role`.
///
/// On success the status is updated, the timeline entry for `target` is
/// stamped with `at`, and the change is returned. On failure the booking is
/// untouched.
///
/// # Errors
///
/// See [`check_transition`].
pub fn request_transition(
    booking: &mut Booking,
    role: Role,
    target: BookingStatus,
    reason: Option<String>,
    at: DateTime<Utc>,
) -> Result<StatusChanged, BookingError> {
    let from = booking.status;
    check_transition(from, target, role)?;

    booking.status = target;
    booking.timeline.stamp(target, at);
    booking.updated_at = at;

    Ok(StatusChanged {
        booking_id: booking.id,
        from,
        to: target,
        actor: role,
        reason: reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty()),
        at,
    })
}

/// Targets `role` may request from `status`, in matrix order.
#[must_use]
pub fn available_transitions(status: BookingStatus, role: Role) -> Vec<BookingStatus> {
    TransitionMatrix::targets(status)
        .iter()
        .copied()
        .filter(|to| role_permits(status, *to, role))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::{at, booking_in};
    use BookingStatus::*;
    use proptest::prelude::*;

    #[test]
    fn fulfiller_accepts_pending() {
        let mut booking = booking_in(Pending);
        let change =
            request_transition(&mut booking, Role::Fulfiller, Accepted, None, at(10)).unwrap();

        assert_eq!(booking.status, Accepted);
        assert_eq!(booking.timeline.accepted_at, Some(at(10)));
        assert_eq!(change.from, Pending);
        assert_eq!(change.to, Accepted);
        assert_eq!(change.actor, Role::Fulfiller);
    }

    #[test]
    fn requester_cannot_accept() {
        let mut booking = booking_in(Pending);
        let err = request_transition(&mut booking, Role::Requester, Accepted, None, at(10))
            .unwrap_err();

        assert_eq!(
            err,
            BookingError::Unauthorized {
                role: Role::Requester,
                from: Pending,
                to: Accepted
            }
        );
        assert_eq!(booking.status, Pending);
        assert_eq!(booking.timeline.accepted_at, None);
    }

    #[test]
    fn only_requester_withdraws_pending() {
        let mut booking = booking_in(Pending);
        assert!(matches!(
            request_transition(&mut booking, Role::Fulfiller, Cancelled, None, at(1)),
            Err(BookingError::Unauthorized { .. })
        ));

        let change = request_transition(
            &mut booking,
            Role::Requester,
            Cancelled,
            Some("  plans changed ".into()),
            at(2),
        )
        .unwrap();
        assert_eq!(change.reason.as_deref(), Some("plans changed"));
        assert_eq!(booking.timeline.cancelled_at, Some(at(2)));
    }

    #[test]
    fn either_side_cancels_once_accepted() {
        for role in [Role::Requester, Role::Fulfiller] {
            let mut booking = booking_in(Accepted);
            request_transition(&mut booking, role, Cancelled, None, at(3)).unwrap();
            assert_eq!(booking.status, Cancelled);
        }
    }

    #[test]
    fn fulfiller_completes_in_progress() {
        let mut booking = booking_in(InProgress);
        request_transition(&mut booking, Role::Fulfiller, Completed, None, at(5)).unwrap();

        assert_eq!(booking.status, Completed);
        assert_eq!(booking.timeline.completed_at, Some(at(5)));
        assert!(booking.messages.is_empty());
        assert!(booking.ratings.is_empty());
    }

    #[test]
    fn illegal_edge_is_reported_before_role() {
        let mut booking = booking_in(Completed);
        let err = request_transition(&mut booking, Role::Requester, Cancelled, None, at(1))
            .unwrap_err();
        assert_eq!(
            err,
            BookingError::InvalidTransition {
                from: Completed,
                to: Cancelled
            }
        );
    }

    #[test]
    fn repeating_a_successful_transition_is_invalid() {
        let mut booking = booking_in(Pending);
        request_transition(&mut booking, Role::Fulfiller, Accepted, None, at(1)).unwrap();
        let err = request_transition(&mut booking, Role::Fulfiller, Accepted, None, at(2))
            .unwrap_err();
        assert!(matches!(err, BookingError::InvalidTransition { .. }));
        assert_eq!(booking.timeline.accepted_at, Some(at(1)));
    }

    #[test]
    fn blank_reason_becomes_none() {
        let mut booking = booking_in(Accepted);
        let change =
            request_transition(&mut booking, Role::Requester, Disputed, Some("   ".into()), at(1))
                .unwrap();
        assert_eq!(change.reason, None);
    }

    #[test]
    fn available_transitions_follow_role() {
        assert_eq!(
            available_transitions(Pending, Role::Fulfiller),
            vec![Accepted, Rejected]
        );
        assert_eq!(available_transitions(Pending, Role::Requester), vec![Cancelled]);
        assert_eq!(
            available_transitions(InProgress, Role::Requester),
            vec![Completed, Cancelled, Disputed]
        );
        assert!(available_transitions(Rejected, Role::Fulfiller).is_empty());
    }

    fn any_status() -> impl Strategy<Value = BookingStatus> {
        proptest::sample::select(BookingStatus::ALL.to_vec())
    }

    fn any_role() -> impl Strategy<Value = Role> {
        prop_oneof![Just(Role::Requester), Just(Role::Fulfiller)]
    }

    proptest! {
        #[test]
        fn outcome_agrees_with_available_transitions(
            from in any_status(),
            to in any_status(),
            role in any_role(),
        ) {
            let mut booking = booking_in(from);
            let allowed = available_transitions(from, role).contains(&to);
            let result = request_transition(&mut booking, role, to, None, at(7));

            prop_assert_eq!(result.is_ok(), allowed);
            if allowed {
                prop_assert_eq!(booking.status, to);
                prop_assert_eq!(booking.timeline.entered_at(to), Some(at(7)));
            } else {
                prop_assert_eq!(booking.status, from);
            }
        }
    }
}
