//! Legal status edges.

use crate::types::BookingStatus;

/// The fixed table of legal status transitions.
///
/// ```text
/// pending      -> accepted | rejected | cancelled
/// accepted     -> in-progress | cancelled | disputed
/// in-progress  -> completed | cancelled | disputed
/// completed    -> disputed
/// rejected, cancelled, disputed are terminal
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct TransitionMatrix;

impl TransitionMatrix {
    /// Statuses reachable from `from` in one step
    #[must_use]
    pub const fn targets(from: BookingStatus) -> &'static [BookingStatus] {
        use BookingStatus::{
            Accepted, Cancelled, Completed, Disputed, InProgress, Pending, Rejected,
        };

        match from {
            Pending => &[Accepted, Rejected, Cancelled],
            Accepted => &[InProgress, Cancelled, Disputed],
            InProgress => &[Completed, Cancelled, Disputed],
            Completed => &[Disputed],
            Rejected | Cancelled | Disputed => &[],
        }
    }

    /// Whether `from -> to` is an edge of the table
    #[must_use]
    pub fn is_legal(from: BookingStatus, to: BookingStatus) -> bool {
        Self::targets(from).contains(&to)
    }

    /// No outgoing edges
    #[must_use]
    pub const fn is_terminal(status: BookingStatus) -> bool {
        Self::targets(status).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BookingStatus::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = BookingStatus> {
        proptest::sample::select(BookingStatus::ALL.to_vec())
    }

    #[test]
    fn table_edges() {
        assert!(TransitionMatrix::is_legal(Pending, Accepted));
        assert!(TransitionMatrix::is_legal(Pending, Rejected));
        assert!(TransitionMatrix::is_legal(Pending, Cancelled));
        assert!(TransitionMatrix::is_legal(Accepted, InProgress));
        assert!(TransitionMatrix::is_legal(InProgress, Completed));
        assert!(TransitionMatrix::is_legal(Completed, Disputed));

        assert!(!TransitionMatrix::is_legal(Pending, InProgress));
        assert!(!TransitionMatrix::is_legal(Pending, Completed));
        assert!(!TransitionMatrix::is_legal(Completed, Cancelled));
        assert!(!TransitionMatrix::is_legal(Accepted, Rejected));
    }

    #[test]
    fn terminal_statuses() {
        let terminal: Vec<_> = BookingStatus::ALL
            .into_iter()
            .filter(|s| TransitionMatrix::is_terminal(*s))
            .collect();
        assert_eq!(terminal, vec![Rejected, Cancelled, Disputed]);
    }

    proptest! {
        #[test]
        fn no_self_loops(status in any_status()) {
            prop_assert!(!TransitionMatrix::is_legal(status, status));
        }

        #[test]
        fn terminal_statuses_reject_everything(from in any_status(), to in any_status()) {
            if TransitionMatrix::is_terminal(from) {
                prop_assert!(!TransitionMatrix::is_legal(from, to));
            }
        }

        #[test]
        fn nothing_returns_to_pending(from in any_status()) {
            prop_assert!(!TransitionMatrix::is_legal(from, Pending));
        }
    }
}
