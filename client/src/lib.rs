//! # Bookwell Client
//!
//! Everything a participant's session needs to talk to a Bookwell server:
//!
//! - [`EventChannel`]: one persistent WebSocket per session with bounded
//!   reconnection, room join and per-category dispatch
//! - [`NotificationStore`]: bounded newest-first buffer fed by the channel
//! - [`Session`]: sign-in state; an expired credential tears everything down
//! - [`BookingApi`]: typed HTTP calls for status changes, messages and ratings
//!
//! ```ignore
//! let channel = EventChannel::new(&ChannelConfig::from_env(), Arc::new(WsConnector::new(url)));
//! let notifications = NotificationStore::new(NotificationEnvironment::new(Arc::new(SystemClock)));
//! let _attachment = notifications.attach(&channel);
//!
//! let session = Session::new(channel.clone(), Arc::new(InMemoryCredentialStore::new()));
//! session.sign_in(Identity::new(user_id, Role::Fulfiller, token)).await?;
//! ```

pub mod api;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod notifications;
pub mod protocol;
pub mod session;
pub mod transport;

pub use api::BookingApi;
pub use channel::{EventChannel, Identity, Subscription};
pub use config::ChannelConfig;
pub use connection::{ConnectionState, LinkEvent};
pub use error::{ApiError, ChannelError, SessionError};
pub use notifications::{
    Attachment, LocalKind, Notification, NotificationEnvironment, NotificationId,
    NotificationKind, NotificationStore,
};
pub use protocol::{BookingUpdate, Category, ClientFrame, ServerEvent, ServerFrame};
pub use session::{CredentialStore, InMemoryCredentialStore, Session, SessionStatus};
pub use transport::{Connector, MemoryConnector, WsConnector};
