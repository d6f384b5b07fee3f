//! # Bookwell Booking
//!
//! The booking lifecycle of a two-sided service marketplace.
//!
//! A booking links a requester and a fulfiller for one engagement and moves
//! through a fixed status graph:
//!
//! ```text
//! pending ──► accepted ──► in-progress ──► completed ──► disputed
//!    │            │              │
//!    ├─► rejected ├─► cancelled  ├─► cancelled
//!    └─► cancelled└─► disputed   └─► disputed
//! ```
//!
//! - [`TransitionMatrix`]: which edges exist
//! - [`lifecycle`]: role policy on top of the matrix, timeline stamping
//! - [`thread`]: per-booking messages and post-completion ratings
//! - [`LifecycleEngine`] / [`BookingThread`]: the same rules persisted through
//!   a [`BookingRepository`] and announced through an [`EventPublisher`]
//! - [`BookingStats`]: per-status counts for a participant's dashboard

pub mod engine;
pub mod environment;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod matrix;
pub mod memory;
pub mod stats;
pub mod thread;
pub mod types;

pub use engine::{BookingThread, LifecycleEngine};
pub use environment::{BookingEnvironment, BookingRepository, EventPublisher};
pub use error::{BookingError, PublishError, RepositoryError};
pub use events::BookingEvent;
pub use lifecycle::StatusChanged;
pub use matrix::TransitionMatrix;
pub use stats::{BookingStats, StatusTally};
pub use types::*;
