//! HTTP API and WebSocket room hub for Bookwell.
//!
//! This crate is the imperative shell around the booking services:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Imperative Shell (Axum)         │  ← HTTP, JSON, WebSocket
//! │  - Bearer credentials → Caller          │  ← CORS, tracing, metrics
//! │  - Party checks                         │
//! │  - Room fan-out                         │
//! ├─────────────────────────────────────────┤
//! │         bookwell-booking                │
//! │  - Transition matrix + role policy      │  ← Pure, testable rules
//! │  - Optimistic persistence               │
//! │  - Domain events                        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Request Flow
//!
//! 1. **Authenticate** the bearer credential into a [`Caller`]
//! 2. **Check** the caller is a party of the booking
//! 3. **Dispatch** to [`LifecycleEngine`](bookwell_booking::LifecycleEngine) or
//!    [`BookingThread`](bookwell_booking::BookingThread)
//! 4. **Publish** the domain event into the [`RoomHub`]
//! 5. **Map** the result to a JSON response or [`AppError`]
//!
//! # Example
//!
//! ```ignore
//! let config = Config::from_env();
//! let app = build_router(AppState::in_memory(&config));
//! let listener = tokio::net::TcpListener::bind(config.server.addr()).await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod rooms;
pub mod router;
pub mod state;

pub use config::Config;
pub use error::AppError;
pub use extractors::{BearerToken, Caller, TokenDirectory};
pub use middleware::{CORRELATION_ID_HEADER, CorrelationId, correlation_id_layer};
pub use rooms::{Room, RoomHub};
pub use router::build_router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
