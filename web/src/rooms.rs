//! Room registry for WebSocket fan-out.
//!
//! Every socket registers once and joins its rooms with the `join` frame:
//!
//! ```text
//! user:<participant>      always
//! role:<requester|fulfiller>
//! area:<lat>:<lng>        fulfillers that sent a location (0.1° grid)
//! ```
//!
//! Domain events from the booking services arrive through
//! [`EventPublisher`] and are routed to the rooms of the booking's parties.

use bookwell_booking::environment::BoxFuture;
use bookwell_booking::{BookingEvent, EventPublisher, GeoPoint, Parties, ParticipantId, PublishError, Role};
use bookwell_client::protocol::{BookingUpdate, Category, JoinRequest, ServerEvent, ServerFrame};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Grid cells per degree for area rooms
const AREA_CELLS_PER_DEGREE: f64 = 10.0;

/// A named group of connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Room {
    User(ParticipantId),
    Role(Role),
    /// Grid cell, in tenths of a degree
    Area { lat: i32, lng: i32 },
}

impl Room {
    /// The area cell containing `point`
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn area(point: GeoPoint) -> Self {
        Self::Area {
            lat: (point.lat * AREA_CELLS_PER_DEGREE).floor() as i32,
            lng: (point.lng * AREA_CELLS_PER_DEGREE).floor() as i32,
        }
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Role(role) => write!(f, "role:{role}"),
            Self::Area { lat, lng } => write!(
                f,
                "area:{:.1}:{:.1}",
                f64::from(*lat) / AREA_CELLS_PER_DEGREE,
                f64::from(*lng) / AREA_CELLS_PER_DEGREE
            ),
        }
    }
}

/// Registry-assigned socket id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct Connection {
    tx: mpsc::UnboundedSender<ServerFrame>,
    rooms: HashSet<Room>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<Room, HashSet<ConnectionId>>,
}

impl Registry {
    fn leave_all(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.get_mut(&id) else {
            return;
        };
        for room in connection.rooms.drain() {
            if let Some(members) = self.rooms.get_mut(&room) {
                members.remove(&id);
                if members.is_empty() {
                    self.rooms.remove(&room);
                }
            }
        }
    }
}

/// Server-side room registry shared by every socket.
#[derive(Clone, Default)]
pub struct RoomHub {
    registry: Arc<RwLock<Registry>>,
}

impl fmt::Debug for RoomHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomHub").finish_non_exhaustive()
    }
}

impl RoomHub {
    /// Empty hub
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket; frames for it arrive on the returned receiver.
    pub async fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.registry.write().await;
        registry.next_id += 1;
        let id = ConnectionId(registry.next_id);
        registry.connections.insert(
            id,
            Connection {
                tx,
                rooms: HashSet::new(),
            },
        );
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("bookwell_ws_connections").set(registry.connections.len() as f64);
        (id, rx)
    }

    /// Put the socket in the rooms for `request`, replacing earlier joins.
    ///
    /// Returns the joined room names; empty when the socket is unknown.
    pub async fn join(&self, id: ConnectionId, request: &JoinRequest) -> Vec<String> {
        let mut rooms = vec![Room::User(request.user_id), Room::Role(request.role)];
        if let (Role::Fulfiller, Some(point)) = (request.role, request.location) {
            rooms.push(Room::area(point));
        }

        let mut registry = self.registry.write().await;
        if !registry.connections.contains_key(&id) {
            return Vec::new();
        }
        registry.leave_all(id);
        for room in &rooms {
            registry.rooms.entry(*room).or_default().insert(id);
        }
        if let Some(connection) = registry.connections.get_mut(&id) {
            connection.rooms.extend(rooms.iter().copied());
        }

        let names: Vec<String> = rooms.iter().map(ToString::to_string).collect();
        tracing::debug!(connection = %id, rooms = ?names, "Joined rooms");
        names
    }

    /// Forget a socket and all its rooms. Idempotent.
    pub async fn leave(&self, id: ConnectionId) {
        let mut registry = self.registry.write().await;
        registry.leave_all(id);
        if registry.connections.remove(&id).is_some() {
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!("bookwell_ws_connections").set(registry.connections.len() as f64);
        }
    }

    /// Registered sockets
    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.connections.len()
    }

    /// Sockets currently in `room`
    pub async fn room_size(&self, room: &Room) -> usize {
        self.registry
            .read()
            .await
            .rooms
            .get(room)
            .map_or(0, HashSet::len)
    }

    /// Send one event to every socket in any of `rooms`, once per socket.
    ///
    /// Returns how many sockets it reached.
    pub async fn deliver(&self, rooms: &[Room], category: Category, payload: Value) -> usize {
        let event = ServerEvent {
            id: Uuid::new_v4().to_string(),
            category,
            payload,
        };

        let registry = self.registry.read().await;
        let targets: HashSet<ConnectionId> = rooms
            .iter()
            .filter_map(|room| registry.rooms.get(room))
            .flatten()
            .copied()
            .collect();

        let delivered = targets
            .iter()
            .filter_map(|id| registry.connections.get(id))
            .filter(|connection| connection.tx.send(ServerFrame::Event(event.clone())).is_ok())
            .count();

        tracing::trace!(%category, delivered, "Event delivered");
        metrics::counter!("bookwell_events_delivered_total", "category" => category.as_str())
            .increment(delivered as u64);
        delivered
    }

    /// Fan a participant's status push out to both parties of the booking.
    pub async fn relay_booking_update(&self, update: &BookingUpdate) -> usize {
        let payload = json!({
            "message": format!("Booking status changed to {}", update.status),
            "booking_id": update.booking_id,
            "status": update.status,
        });
        self.deliver(
            &[Room::User(update.requester_id), Room::User(update.fulfiller_id)],
            Category::BookingUpdate,
            payload,
        )
        .await
    }

    async fn route(&self, event: &BookingEvent) -> Result<(), PublishError> {
        let body = serde_json::to_value(event).map_err(|e| PublishError(e.to_string()))?;
        let parties = event.parties();
        let payload = |message: String| json!({ "message": message, "event": body });

        match event {
            BookingEvent::Created { point, .. } => {
                self.deliver(
                    &[Room::User(parties.fulfiller)],
                    Category::BookingRequest,
                    payload("You have a new booking request".to_string()),
                )
                .await;
                self.deliver(
                    &[Room::area(*point)],
                    Category::Activity,
                    payload("New booking request in your area".to_string()),
                )
                .await;
            },
            BookingEvent::StatusChanged { change, .. } => {
                self.deliver(
                    &[Room::User(parties.requester), Room::User(parties.fulfiller)],
                    Category::BookingUpdate,
                    payload(format!("Booking status changed to {}", change.to)),
                )
                .await;
            },
            BookingEvent::MessagePosted { message, .. } => {
                self.deliver(
                    &other_parties(parties, message.sender),
                    Category::Message,
                    payload(message.text.clone()),
                )
                .await;
            },
            BookingEvent::RatingSubmitted { rating, .. } => {
                self.deliver(
                    &other_parties(parties, rating.rater),
                    Category::BookingUpdate,
                    payload(format!("You received a {}-star rating", rating.rating)),
                )
                .await;
            },
        }
        Ok(())
    }
}

/// User rooms of everyone in `parties` except `author`.
fn other_parties(parties: Parties, author: ParticipantId) -> Vec<Room> {
    match parties.role_of(author) {
        Some(role) => vec![Room::User(parties.get(role.counterpart()))],
        None => vec![Room::User(parties.requester), Room::User(parties.fulfiller)],
    }
}

impl EventPublisher for RoomHub {
    fn publish(&self, event: BookingEvent) -> BoxFuture<'_, Result<(), PublishError>> {
        Box::pin(async move { self.route(&event).await })
    }
}
