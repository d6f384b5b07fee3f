//! WebSocket endpoint for real-time booking events.
//!
//! # Architecture
//!
//! ```text
//! Client          WebSocket Handler          RoomHub
//!   │                    │                     │
//!   ├─ Upgrade (Bearer) ►│                     │
//!   │                    ├─ register() ───────►│
//!   ├─ join ────────────►│                     │
//!   │                    ├─ join(rooms) ──────►│
//!   │◄─ joined ──────────┤                     │
//!   │                    │◄── event ───────────┤  (engine publishes)
//!   │◄─ event ───────────┤                     │
//!   │◄─ ping ────────────┤                     │
//!   ├─ pong ────────────►│                     │
//! ```
//!
//! One loop per socket multiplexes outbound events, keep-alive pings, the
//! idle deadline and inbound frames, so the socket is never split across
//! tasks and error frames can always be answered. Frame shapes live in
//! [`bookwell_client::protocol`].

use crate::error::AppError;
use crate::extractors::Caller;
use crate::rooms::ConnectionId;
use crate::state::AppState;
use crate::WebResult;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use bookwell_booking::BookingId;
use bookwell_client::protocol::{BOOKING_UPDATE_EVENT, BookingUpdate, ClientFrame, ServerFrame};
use futures::{SinkExt, stream::StreamExt};
use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Upgrade an authenticated request to a WebSocket.
///
/// # Errors
///
/// 401 before the upgrade for a missing or unknown credential, 503 once
/// `max_connections` sockets are open.
pub async fn handle(
    caller: Caller,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> WebResult<Response> {
    if state.rooms.connection_count().await >= state.websocket.max_connections {
        warn!(max = state.websocket.max_connections, "Refusing WebSocket: connection limit reached");
        return Err(AppError::unavailable("Too many open connections"));
    }

    info!(participant = %caller.participant, role = %caller.role, "WebSocket connection requested");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, caller)))
}

/// Drive one socket until either side closes it or it goes idle.
async fn handle_socket(socket: WebSocket, state: AppState, caller: Caller) {
    let (id, mut outbound) = state.rooms.register().await;
    info!(connection = %id, participant = %caller.participant, "WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();

    let idle_after = state.websocket.idle_after();
    let mut deadline = Instant::now() + idle_after;
    let ping_every = state.websocket.ping_every();
    let mut ping = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let reply = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = ping.tick() => ServerFrame::Ping,
            () = tokio::time::sleep_until(deadline) => {
                info!(connection = %id, "Closing idle WebSocket");
                break;
            },
            message = receiver.next() => {
                let Some(Ok(message)) = message else {
                    break;
                };
                deadline = Instant::now() + idle_after;
                match message {
                    Message::Text(text) => match handle_frame(&state, id, caller, &text).await {
                        Some(reply) => reply,
                        None => continue,
                    },
                    Message::Binary(_) => {
                        warn!(connection = %id, "Received unexpected binary message");
                        continue;
                    },
                    Message::Ping(_) | Message::Pong(_) => continue,
                    Message::Close(_) => {
                        info!(connection = %id, "Client requested close");
                        break;
                    },
                }
            },
        };

        let text = match serde_json::to_string(&reply) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to serialize frame");
                continue;
            },
        };
        if sender.send(Message::Text(text)).await.is_err() {
            break;
        }
    }

    state.rooms.leave(id).await;
    info!(connection = %id, "WebSocket connection closed");
}

fn error_frame(message: impl Into<String>) -> ServerFrame {
    ServerFrame::Error {
        message: message.into(),
    }
}

/// Handle one client frame; returns the answer to send back, if any.
async fn handle_frame(
    state: &AppState,
    id: ConnectionId,
    caller: Caller,
    text: &str,
) -> Option<ServerFrame> {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(connection = %id, error = %e, "Failed to parse WebSocket frame");
            return Some(error_frame(format!("Invalid frame: {e}")));
        },
    };

    match frame {
        ClientFrame::Join(request) => {
            if request.user_id != caller.participant || request.role != caller.role {
                warn!(connection = %id, "Join does not match the credential");
                return Some(error_frame("Join does not match your credential"));
            }
            let rooms = state.rooms.join(id, &request).await;
            Some(ServerFrame::Joined { rooms })
        },
        ClientFrame::Emit { event, payload } if event == BOOKING_UPDATE_EVENT => {
            relay_update(state, caller, payload).await.err()
        },
        ClientFrame::Emit { event, .. } => {
            debug!(connection = %id, %event, "Unknown client event");
            Some(error_frame(format!("Unknown event '{event}'")))
        },
        ClientFrame::Pong => {
            trace!(connection = %id, "Pong");
            None
        },
    }
}

/// Re-announce a booking's current status to both of its parties.
///
/// Parties and status are taken from the stored booking, not the payload.
async fn relay_update(state: &AppState, caller: Caller, payload: Value) -> Result<(), ServerFrame> {
    #[derive(serde::Deserialize)]
    struct Target {
        booking_id: BookingId,
    }

    let Target { booking_id } = serde_json::from_value(payload)
        .map_err(|e| error_frame(format!("Invalid booking_update payload: {e}")))?;
    let booking = state
        .engine
        .load(booking_id)
        .await
        .map_err(|e| error_frame(e.to_string()))?;
    if booking.role_of(caller.participant).is_none() {
        return Err(error_frame("You are not a party of this booking"));
    }

    let delivered = state
        .rooms
        .relay_booking_update(&BookingUpdate {
            booking_id,
            requester_id: booking.requester,
            fulfiller_id: booking.fulfiller,
            status: booking.status,
        })
        .await;
    debug!(%booking_id, delivered, "Relayed booking update");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::WsConfig;
    use crate::extractors::TokenDirectory;
    use bookwell_booking::memory::InMemoryBookingRepository;
    use bookwell_booking::{
        GeoPoint, Location, NewBooking, ParticipantId, Role, Schedule, ServiceId,
    };
    use bookwell_client::protocol::{Category, JoinRequest};
    use chrono::{NaiveDate, NaiveTime};
    use serde_json::json;
    use std::sync::Arc;

    fn state() -> AppState {
        AppState::new(
            Arc::new(InMemoryBookingRepository::new()),
            TokenDirectory::default(),
            WsConfig::default(),
        )
    }

    fn caller(role: Role) -> Caller {
        Caller {
            participant: ParticipantId::new(),
            role,
        }
    }

    fn join_text(caller: Caller) -> String {
        serde_json::to_string(&ClientFrame::Join(JoinRequest {
            role: caller.role,
            user_id: caller.participant,
            location: None,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn join_must_match_the_credential() {
        let state = state();
        let (id, _rx) = state.rooms.register().await;
        let me = caller(Role::Fulfiller);

        let forged = Caller {
            participant: ParticipantId::new(),
            role: Role::Fulfiller,
        };
        let reply = handle_frame(&state, id, me, &join_text(forged)).await;
        assert!(matches!(reply, Some(ServerFrame::Error { .. })));

        let reply = handle_frame(&state, id, me, &join_text(me)).await;
        let Some(ServerFrame::Joined { rooms }) = reply else {
            panic!("expected a joined frame, got {reply:?}");
        };
        assert_eq!(rooms, vec![format!("user:{}", me.participant), "role:fulfiller".to_string()]);
    }

    #[tokio::test]
    async fn garbage_and_unknown_events_get_error_frames() {
        let state = state();
        let (id, _rx) = state.rooms.register().await;
        let me = caller(Role::Requester);

        let reply = handle_frame(&state, id, me, "{not json").await;
        assert!(matches!(reply, Some(ServerFrame::Error { .. })));

        let unknown = json!({"type": "emit", "event": "dance", "payload": {}}).to_string();
        let Some(ServerFrame::Error { message }) = handle_frame(&state, id, me, &unknown).await
        else {
            panic!("expected an error frame");
        };
        assert_eq!(message, "Unknown event 'dance'");

        assert!(handle_frame(&state, id, me, r#"{"type":"pong"}"#).await.is_none());
    }

    #[tokio::test]
    async fn booking_update_is_relayed_to_both_parties() {
        let state = state();
        let requester = caller(Role::Requester);
        let fulfiller = caller(Role::Fulfiller);
        let booking = state
            .engine
            .create(NewBooking {
                requester: requester.participant,
                fulfiller: fulfiller.participant,
                service: ServiceId::new(),
                schedule: Schedule {
                    date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                    start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    end: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                },
                location: Location {
                    point: GeoPoint { lat: 1.0, lng: 1.0 },
                    address: "1 Test Way".into(),
                    details: None,
                },
                quoted_cents: 5_000,
                requirements: None,
            })
            .await
            .unwrap();

        let (a, mut a_rx) = state.rooms.register().await;
        let (b, mut b_rx) = state.rooms.register().await;
        handle_frame(&state, a, requester, &join_text(requester)).await;
        handle_frame(&state, b, fulfiller, &join_text(fulfiller)).await;

        let emit = json!({
            "type": "emit",
            "event": BOOKING_UPDATE_EVENT,
            "payload": {"booking_id": booking.id, "status": "accepted"},
        })
        .to_string();
        assert!(handle_frame(&state, a, requester, &emit).await.is_none());

        for rx in [&mut a_rx, &mut b_rx] {
            let Ok(ServerFrame::Event(event)) = rx.try_recv() else {
                panic!("expected a relayed event");
            };
            assert_eq!(event.category, Category::BookingUpdate);
            assert_eq!(event.payload["status"], "pending");
        }

        let stranger = caller(Role::Requester);
        let reply = handle_frame(&state, a, stranger, &emit).await;
        assert!(matches!(reply, Some(ServerFrame::Error { .. })));
    }
}
