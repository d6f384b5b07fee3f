//! HTTP and WebSocket handlers.

pub mod bookings;
pub mod health;
pub mod websocket;

pub use health::health_check;
