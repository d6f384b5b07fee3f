//! Application state for Axum handlers.

use crate::config::{Config, WsConfig};
use crate::extractors::TokenDirectory;
use crate::rooms::RoomHub;
use bookwell_booking::memory::InMemoryBookingRepository;
use bookwell_booking::{BookingEnvironment, BookingRepository, BookingThread, LifecycleEngine};
use std::sync::Arc;

/// Application state shared across all HTTP and WebSocket handlers.
///
/// Cheap to clone; every field shares its backing store.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Booking creation and status changes
    pub engine: LifecycleEngine,
    /// Messages and ratings
    pub thread: BookingThread,
    /// WebSocket rooms; also the publisher of booking events
    pub rooms: RoomHub,
    /// Accepted bearer credentials
    pub tokens: Arc<TokenDirectory>,
    /// Socket limits and keep-alive
    pub websocket: WsConfig,
}

impl AppState {
    /// Wire the booking services to `repository`, publishing into a fresh
    /// [`RoomHub`].
    #[must_use]
    pub fn new(
        repository: Arc<dyn BookingRepository>,
        tokens: TokenDirectory,
        websocket: WsConfig,
    ) -> Self {
        let rooms = RoomHub::new();
        let env = BookingEnvironment::new(repository, Arc::new(rooms.clone()));
        Self {
            engine: LifecycleEngine::new(env.clone()),
            thread: BookingThread::new(env),
            rooms,
            tokens: Arc::new(tokens),
            websocket,
        }
    }

    /// State over an in-memory repository, configured from `config`.
    #[must_use]
    pub fn in_memory(config: &Config) -> Self {
        Self::new(
            Arc::new(InMemoryBookingRepository::new()),
            TokenDirectory::new(config.tokens.iter().cloned()),
            config.websocket,
        )
    }
}
