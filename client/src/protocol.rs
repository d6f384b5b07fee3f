//! WebSocket frames exchanged between a session and the server.
//!
//! **Client → Server:**
//! ```json
//! {"type": "join", "role": "fulfiller", "user_id": "…", "location": {"lat": 40.7, "lng": -74.0}}
//! {"type": "emit", "event": "booking_update", "payload": {…}}
//! {"type": "pong"}
//! ```
//!
//! **Server → Client:**
//! ```json
//! {"type": "event", "id": "…", "category": "booking_update", "payload": {"message": "…"}}
//! {"type": "joined", "rooms": ["user:…", "role:fulfiller"]}
//! {"type": "error", "message": "…"}
//! {"type": "ping"}
//! ```

use bookwell_booking::{BookingId, BookingStatus, GeoPoint, ParticipantId, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Event categories a session can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// A requester asked this fulfiller for a booking
    BookingRequest,
    /// A booking the session takes part in changed status
    BookingUpdate,
    /// A new thread message
    Message,
    /// Something happened near a fulfiller's area
    Activity,
}

impl Category {
    /// All categories
    pub const ALL: [Self; 4] = [
        Self::BookingRequest,
        Self::BookingUpdate,
        Self::Message,
        Self::Activity,
    ];

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BookingRequest => "booking_request",
            Self::BookingUpdate => "booking_update",
            Self::Message => "message",
            Self::Activity => "activity",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Room-join request sent right after connecting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub role: Role,
    pub user_id: ParticipantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

/// Frames sent by the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Join the rooms for this identity
    Join(JoinRequest),
    /// Free-form push to the server
    Emit {
        /// Event name
        event: String,
        /// Event body
        payload: Value,
    },
    /// Answer to a server ping
    Pong,
}

/// A delivered event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    /// Server-assigned id, stable across redelivery
    pub id: String,
    pub category: Category,
    /// Body; carries a human-readable `message` when the server has one
    pub payload: Value,
}

impl ServerEvent {
    /// The `message` field of the payload, if present
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.payload.get("message").and_then(Value::as_str)
    }
}

/// Frames sent by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// An event for one of the joined rooms
    Event(ServerEvent),
    /// Join acknowledged
    Joined {
        /// Rooms the connection now belongs to
        rooms: Vec<String>,
    },
    /// The server could not handle a frame
    Error {
        /// What went wrong
        message: String,
    },
    /// Keep-alive; answer with [`ClientFrame::Pong`]
    Ping,
}

/// Event name of [`BookingUpdate`] pushes
pub const BOOKING_UPDATE_EVENT: &str = "booking_update";

/// Status push a participant emits after changing a booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingUpdate {
    pub booking_id: BookingId,
    pub requester_id: ParticipantId,
    pub fulfiller_id: ParticipantId,
    pub status: BookingStatus,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_frame_shape() {
        let user_id = ParticipantId::new();
        let frame = ClientFrame::Join(JoinRequest {
            role: Role::Fulfiller,
            user_id,
            location: Some(GeoPoint { lat: 1.5, lng: 2.5 }),
        });

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "join",
                "role": "fulfiller",
                "user_id": user_id.to_string(),
                "location": {"lat": 1.5, "lng": 2.5}
            })
        );
        assert_eq!(serde_json::from_value::<ClientFrame>(value).unwrap(), frame);
    }

    #[test]
    fn join_without_location_omits_it() {
        let frame = ClientFrame::Join(JoinRequest {
            role: Role::Requester,
            user_id: ParticipantId::new(),
            location: None,
        });
        let value = serde_json::to_value(&frame).unwrap();
        assert!(value.get("location").is_none());
    }

    #[test]
    fn server_event_parses() {
        let frame: ServerFrame = serde_json::from_str(
            r#"{"type":"event","id":"e-1","category":"booking_request","payload":{"message":"hi"}}"#,
        )
        .unwrap();
        let ServerFrame::Event(event) = frame else {
            panic!("expected an event frame");
        };
        assert_eq!(event.category, Category::BookingRequest);
        assert_eq!(event.message(), Some("hi"));
    }

    #[test]
    fn simple_frames() {
        assert_eq!(
            serde_json::to_string(&ClientFrame::Pong).unwrap(),
            r#"{"type":"pong"}"#
        );
        assert_eq!(
            serde_json::from_str::<ServerFrame>(r#"{"type":"ping"}"#).unwrap(),
            ServerFrame::Ping
        );
    }
}
