//! Bounded newest-first notification buffer.
//!
//! State changes are a pure [`Reducer`]; [`NotificationStore`] runs it on the
//! runtime [`Store`] so every mutation is serialized through one queue.

use crate::channel::{EventChannel, Subscription};
use crate::protocol::{Category, ServerEvent};
use bookwell_core::environment::Clock;
use bookwell_core::{Effect, Reducer, SmallVec, smallvec};
use bookwell_runtime::{Store, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Most notifications kept; older ones are evicted
pub const CAPACITY: usize = 50;

/// Unique identifier for a notification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(Uuid);

impl NotificationId {
    /// Creates a new random `NotificationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `NotificationId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for NotificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a notification is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingRequest,
    BookingUpdate,
    Message,
    Activity,
    Success,
    Error,
    Info,
    Warning,
}

/// Kinds a local [`NotificationStore::show`] call may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalKind {
    Success,
    Error,
    Info,
    Warning,
}

impl LocalKind {
    /// Title shown for the kind
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Error => "Error",
            Self::Info => "Info",
            Self::Warning => "Warning",
        }
    }
}

impl From<LocalKind> for NotificationKind {
    fn from(kind: LocalKind) -> Self {
        match kind {
            LocalKind::Success => Self::Success,
            LocalKind::Error => Self::Error,
            LocalKind::Info => Self::Info,
            LocalKind::Warning => Self::Warning,
        }
    }
}

impl From<Category> for NotificationKind {
    fn from(category: Category) -> Self {
        match category {
            Category::BookingRequest => Self::BookingRequest,
            Category::BookingUpdate => Self::BookingUpdate,
            Category::Message => Self::Message,
            Category::Activity => Self::Activity,
        }
    }
}

/// Title and fallback message for events of a category.
#[must_use]
pub const fn presentation(category: Category) -> (&'static str, &'static str) {
    match category {
        Category::BookingRequest => ("New Booking Request", "You have a new booking request"),
        Category::BookingUpdate => ("Booking Update", "Your booking status has been updated"),
        Category::Message => ("New Message", "You have a new message"),
        Category::Activity => ("Booking Activity", "There's new activity in your area"),
    }
}

/// One entry of the buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
    pub read: bool,
    /// Server event id, used to drop redeliveries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

/// Buffer contents, newest first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NotificationState {
    pub notifications: VecDeque<Notification>,
    /// Mirrors whether the event channel is connected
    pub connected: bool,
}

impl NotificationState {
    /// Entries not yet read
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.read).count()
    }

    /// Entry by id
    #[must_use]
    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.notifications.iter().find(|n| n.id == id)
    }

    fn has_source(&self, source_id: &str) -> bool {
        self.notifications
            .iter()
            .any(|n| n.source_id.as_deref() == Some(source_id))
    }
}

/// Everything that can happen to the buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum NotificationAction {
    /// Add an entry at the front
    Ingest {
        kind: NotificationKind,
        title: String,
        message: String,
        payload: Value,
        source_id: Option<String>,
    },
    /// Mark one entry read
    MarkRead(NotificationId),
    /// Mark every entry read
    MarkAllRead,
    /// Drop one entry
    Remove(NotificationId),
    /// Drop everything
    Clear,
    /// Channel connectivity changed
    SetConnected(bool),
}

/// Source of fresh notification ids.
pub trait IdSource: Send + Sync {
    /// Next id
    fn next_id(&self) -> NotificationId;
}

/// Random v4 ids
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomIds;

impl IdSource for RandomIds {
    fn next_id(&self) -> NotificationId {
        NotificationId::new()
    }
}

/// Dependencies of [`NotificationReducer`].
#[derive(Clone)]
pub struct NotificationEnvironment {
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdSource>,
}

impl NotificationEnvironment {
    /// Environment with random ids
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            ids: Arc::new(RandomIds),
        }
    }

    /// Replace the id source
    #[must_use]
    pub fn with_ids(mut self, ids: Arc<dyn IdSource>) -> Self {
        self.ids = ids;
        self
    }
}

/// Pure state transitions of the buffer.
#[derive(Clone, Copy, Debug, Default)]
pub struct NotificationReducer;

impl Reducer for NotificationReducer {
    type State = NotificationState;
    type Action = NotificationAction;
    type Environment = NotificationEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            NotificationAction::Ingest {
                kind,
                title,
                message,
                payload,
                source_id,
            } => {
                if let Some(source) = source_id.as_deref() {
                    if state.has_source(source) {
                        tracing::debug!(source_id = source, "Duplicate notification dropped");
                        return smallvec![Effect::None];
                    }
                }
                state.notifications.push_front(Notification {
                    id: env.ids.next_id(),
                    kind,
                    title,
                    message,
                    timestamp: env.clock.now(),
                    payload,
                    read: false,
                    source_id,
                });
                state.notifications.truncate(CAPACITY);
            },
            NotificationAction::MarkRead(id) => {
                if let Some(n) = state.notifications.iter_mut().find(|n| n.id == id) {
                    n.read = true;
                }
            },
            NotificationAction::MarkAllRead => {
                for n in &mut state.notifications {
                    n.read = true;
                }
            },
            NotificationAction::Remove(id) => {
                state.notifications.retain(|n| n.id != id);
            },
            NotificationAction::Clear => state.notifications.clear(),
            NotificationAction::SetConnected(connected) => state.connected = connected,
        }
        smallvec![Effect::None]
    }
}

/// Background wiring created by [`NotificationStore::attach`].
#[derive(Debug)]
pub struct Attachment {
    subscriptions: Vec<Subscription>,
    tasks: Vec<JoinHandle<()>>,
}

impl Attachment {
    /// Unsubscribe from the channel and stop forwarding
    pub fn detach(self) {
        for subscription in self.subscriptions {
            subscription.cancel();
        }
        for task in self.tasks {
            task.abort();
        }
    }
}

type Inner = Store<NotificationState, NotificationAction, NotificationEnvironment, NotificationReducer>;

/// A session's notification buffer.
#[derive(Clone)]
pub struct NotificationStore {
    store: Arc<Inner>,
}

impl fmt::Debug for NotificationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationStore").finish_non_exhaustive()
    }
}

impl NotificationStore {
    /// Empty buffer
    #[must_use]
    pub fn new(env: NotificationEnvironment) -> Self {
        Self {
            store: Arc::new(Store::new(
                NotificationState::default(),
                NotificationReducer,
                env,
            )),
        }
    }

    async fn send(&self, action: NotificationAction) -> Result<(), StoreError> {
        self.store.send(action).await.map(|_| ())
    }

    /// Add an entry; ignored when `source_id` is already buffered.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownInProgress`] once the store is shut down.
    pub async fn ingest(
        &self,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        payload: Value,
        source_id: Option<String>,
    ) -> Result<(), StoreError> {
        self.send(NotificationAction::Ingest {
            kind,
            title: title.into(),
            message: message.into(),
            payload,
            source_id,
        })
        .await
    }

    /// Add a local entry titled after its kind.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownInProgress`] once the store is shut down.
    pub async fn show(&self, message: impl Into<String>, kind: LocalKind) -> Result<(), StoreError> {
        self.ingest(kind.into(), kind.title(), message, Value::Null, None)
            .await
    }

    /// Mark one entry read.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownInProgress`] once the store is shut down.
    pub async fn mark_read(&self, id: NotificationId) -> Result<(), StoreError> {
        self.send(NotificationAction::MarkRead(id)).await
    }

    /// Mark everything read.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownInProgress`] once the store is shut down.
    pub async fn mark_all_read(&self) -> Result<(), StoreError> {
        self.send(NotificationAction::MarkAllRead).await
    }

    /// Drop one entry.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownInProgress`] once the store is shut down.
    pub async fn remove(&self, id: NotificationId) -> Result<(), StoreError> {
        self.send(NotificationAction::Remove(id)).await
    }

    /// Drop everything.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownInProgress`] once the store is shut down.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.send(NotificationAction::Clear).await
    }

    /// Stop accepting changes; attached channels stop forwarding.
    ///
    /// The buffer stays readable.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownTimeout`] if queued work outlives `grace`.
    pub async fn close(&self, grace: Duration) -> Result<(), StoreError> {
        self.store.shutdown(grace).await
    }

    /// Copy of the current buffer
    pub async fn snapshot(&self) -> NotificationState {
        self.store.state(Clone::clone).await
    }

    /// Unread entries
    pub async fn unread_count(&self) -> usize {
        self.store.state(NotificationState::unread_count).await
    }

    /// Feed the four server categories of `channel` into this buffer and
    /// mirror its connectivity.
    ///
    /// Events from all categories go through one queue, so they are ingested
    /// in arrival order.
    #[must_use]
    pub fn attach(&self, channel: &EventChannel) -> Attachment {
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

        let subscriptions = Category::ALL
            .into_iter()
            .map(|category| {
                let tx = tx.clone();
                channel.subscribe(category, move |event| {
                    let _ = tx.send(event);
                })
            })
            .collect();

        let ingest = {
            let store = self.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    let (title, fallback) = presentation(event.category);
                    let message = event.message().unwrap_or(fallback).to_string();
                    if let Err(e) = store
                        .ingest(event.category.into(), title, message, event.payload, Some(event.id))
                        .await
                    {
                        tracing::warn!(error = %e, "Notification store rejected event");
                        break;
                    }
                }
            })
        };

        let connectivity = {
            let store = self.clone();
            let mut states = channel.watch_state();
            tokio::spawn(async move {
                loop {
                    let connected = states.borrow_and_update().is_connected();
                    if store
                        .send(NotificationAction::SetConnected(connected))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    if states.changed().await.is_err() {
                        break;
                    }
                }
            })
        };

        Attachment {
            subscriptions,
            tasks: vec![ingest, connectivity],
        }
    }
}
