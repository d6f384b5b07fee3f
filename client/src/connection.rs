//! Connection lifecycle as a pure state machine.
//!
//! ```text
//!               connect                opened
//! Disconnected ─────────► Connecting ─────────► Connected
//!      ▲                   │    ▲                   │
//!      │ gave up / 401     │    │ retry elapsed     │ lost
//!      ├───────────────────┘    │                   │
//!      │              failed    │                   ▼
//!      └──────────────────── Reconnecting ◄─────────┘
//! ```
//!
//! `attempt` counts retries since the last successful connection; it drops
//! back to zero whenever a connection opens.

use bookwell_runtime::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the channel is in its lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Idle; nothing scheduled
    #[default]
    Disconnected,
    /// Opening a connection
    Connecting {
        /// Retries so far (0 for the first attempt)
        attempt: usize,
    },
    /// Open and joined
    Connected,
    /// Waiting before the next retry
    Reconnecting {
        /// Number of the retry being waited for (1-based)
        attempt: usize,
    },
}

/// Inputs that move the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// Caller asked to connect
    ConnectRequested,
    /// The transport opened
    Opened,
    /// An attempt failed (refused, timed out)
    Failed,
    /// An open connection dropped without the caller asking
    Lost,
    /// The server rejected the credential
    CredentialRejected,
    /// The retry pause is over
    RetryElapsed,
    /// Caller asked to disconnect
    DisconnectRequested,
}

impl ConnectionState {
    /// Next state after `event`.
    ///
    /// Events that make no sense in the current state leave it unchanged.
    #[must_use]
    pub const fn on(self, event: LinkEvent, policy: &RetryPolicy) -> Self {
        match (self, event) {
            (_, LinkEvent::DisconnectRequested | LinkEvent::CredentialRejected) => {
                Self::Disconnected
            },
            (Self::Disconnected, LinkEvent::ConnectRequested) => Self::Connecting { attempt: 0 },
            (Self::Connecting { .. }, LinkEvent::Opened) => Self::Connected,
            (Self::Connecting { attempt }, LinkEvent::Failed) => Self::retry_or_give_up(attempt, policy),
            (Self::Connected, LinkEvent::Lost) => Self::retry_or_give_up(0, policy),
            (Self::Reconnecting { attempt }, LinkEvent::RetryElapsed) => Self::Connecting { attempt },
            (state, _) => state,
        }
    }

    const fn retry_or_give_up(retries_so_far: usize, policy: &RetryPolicy) -> Self {
        if policy.should_retry(retries_so_far) {
            Self::Reconnecting {
                attempt: retries_so_far + 1,
            }
        } else {
            Self::Disconnected
        }
    }

    /// True only in [`ConnectionState::Connected`]
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// True when the channel has settled, connected or not
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Connected | Self::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting { attempt } => write!(f, "connecting (retry {attempt})"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (retry {attempt})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy::fixed(5, Duration::from_secs(3))
    }

    fn run(events: &[LinkEvent]) -> ConnectionState {
        events
            .iter()
            .fold(Disconnected, |state, event| state.on(*event, &policy()))
    }

    #[test]
    fn happy_path() {
        assert_eq!(
            run(&[LinkEvent::ConnectRequested, LinkEvent::Opened]),
            Connected
        );
    }

    #[test]
    fn connect_is_a_no_op_when_connected() {
        assert_eq!(Connected.on(LinkEvent::ConnectRequested, &policy()), Connected);
    }

    #[test]
    fn loss_schedules_a_retry() {
        let state = run(&[
            LinkEvent::ConnectRequested,
            LinkEvent::Opened,
            LinkEvent::Lost,
        ]);
        assert_eq!(state, Reconnecting { attempt: 1 });
        assert_eq!(
            state.on(LinkEvent::RetryElapsed, &policy()),
            Connecting { attempt: 1 }
        );
    }

    #[test]
    fn gives_up_after_five_retries() {
        let mut state = Disconnected.on(LinkEvent::ConnectRequested, &policy());
        for retry in 1..=5 {
            state = state.on(LinkEvent::Failed, &policy());
            assert_eq!(state, Reconnecting { attempt: retry });
            state = state.on(LinkEvent::RetryElapsed, &policy());
        }
        assert_eq!(state.on(LinkEvent::Failed, &policy()), Disconnected);
    }

    #[test]
    fn counter_resets_after_success() {
        let state = run(&[
            LinkEvent::ConnectRequested,
            LinkEvent::Failed,
            LinkEvent::RetryElapsed,
            LinkEvent::Failed,
            LinkEvent::RetryElapsed,
            LinkEvent::Opened,
            LinkEvent::Lost,
        ]);
        assert_eq!(state, Reconnecting { attempt: 1 });
    }

    #[test]
    fn credential_rejection_is_final() {
        let state = run(&[LinkEvent::ConnectRequested, LinkEvent::CredentialRejected]);
        assert_eq!(state, Disconnected);
        assert_eq!(state.on(LinkEvent::RetryElapsed, &policy()), Disconnected);
    }

    #[test]
    fn zero_retry_policy_never_reconnects() {
        let none = RetryPolicy::fixed(0, Duration::ZERO);
        assert_eq!(Connected.on(LinkEvent::Lost, &none), Disconnected);
    }

    fn any_event() -> impl Strategy<Value = LinkEvent> {
        proptest::sample::select(vec![
            LinkEvent::ConnectRequested,
            LinkEvent::Opened,
            LinkEvent::Failed,
            LinkEvent::Lost,
            LinkEvent::CredentialRejected,
            LinkEvent::RetryElapsed,
            LinkEvent::DisconnectRequested,
        ])
    }

    proptest! {
        #[test]
        fn retry_counter_is_bounded(events in proptest::collection::vec(any_event(), 0..64)) {
            let policy = policy();
            let mut state = Disconnected;
            for event in events {
                state = state.on(event, &policy);
                if let Connecting { attempt } | Reconnecting { attempt } = state {
                    prop_assert!(attempt <= policy.max_retries);
                }
            }
        }

        #[test]
        fn disconnect_always_settles(events in proptest::collection::vec(any_event(), 0..32)) {
            let policy = policy();
            let state = events.into_iter().fold(Disconnected, |s, e| s.on(e, &policy));
            prop_assert_eq!(state.on(LinkEvent::DisconnectRequested, &policy), Disconnected);
        }
    }
}
