//! The session's persistent event connection.
//!
//! One [`EventChannel`] is built at the composition root and cloned into
//! whatever needs it. It owns a supervisor task that opens links through a
//! [`Connector`], joins the identity's rooms, answers keep-alives, dispatches
//! events to the registered handlers, and reconnects with a fixed bound.
//!
//! ```text
//! connect(identity) ──► supervisor ──► Connector::connect ──► Link
//!                          │   ▲                               │
//!                          │   └──── retry (bounded) ◄── lost ─┤
//!                          ▼                                   ▼
//!                   ConnectionState (watch)            handlers[category]
//! ```

use crate::config::ChannelConfig;
use crate::connection::{ConnectionState, LinkEvent};
use crate::error::ChannelError;
use crate::protocol::{
    BOOKING_UPDATE_EVENT, BookingUpdate, Category, ClientFrame, JoinRequest, ServerEvent,
    ServerFrame,
};
use crate::transport::{Connector, Link};
use bookwell_booking::{GeoPoint, ParticipantId, Role};
use bookwell_runtime::RetryPolicy;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Callback invoked for every event of a category.
pub type Handler = Arc<dyn Fn(ServerEvent) + Send + Sync>;

/// Who the session is, and how it authenticates.
#[derive(Clone, PartialEq)]
pub struct Identity {
    /// Participant id used for the `user:<id>` room
    pub user_id: ParticipantId,
    /// Side of the marketplace
    pub role: Role,
    /// Last known position (fulfillers use it for area rooms)
    pub location: Option<GeoPoint>,
    /// Bearer credential
    pub credential: String,
}

impl Identity {
    /// Identity without a location
    #[must_use]
    pub fn new(user_id: ParticipantId, role: Role, credential: impl Into<String>) -> Self {
        Self {
            user_id,
            role,
            location: None,
            credential: credential.into(),
        }
    }

    /// Attach a location
    #[must_use]
    pub const fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    /// The join frame for this identity
    #[must_use]
    pub const fn join_request(&self) -> JoinRequest {
        JoinRequest {
            role: self.role,
            user_id: self.user_id,
            location: self.location,
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .field("location", &self.location)
            .field("credential", &"<redacted>")
            .finish()
    }
}

struct Registration {
    token: u64,
    handler: Handler,
}

struct Inner {
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    connect_timeout: std::time::Duration,
    state: watch::Sender<ConnectionState>,
    handlers: Mutex<HashMap<Category, Registration>>,
    next_token: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientFrame>>>,
    last_error: Mutex<Option<ChannelError>>,
    supervisor: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn apply(&self, event: LinkEvent) -> ConnectionState {
        let mut next = ConnectionState::Disconnected;
        self.state.send_modify(|state| {
            let previous = *state;
            *state = state.on(event, &self.policy);
            next = *state;
            if previous != next {
                tracing::debug!(?event, from = %previous, to = %next, "Channel state changed");
            }
        });
        metrics::gauge!("bookwell_channel_connected").set(if next.is_connected() { 1.0 } else { 0.0 });
        next
    }

    fn set_error(&self, err: Option<ChannelError>) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = err;
        }
    }

    /// Record `err` and apply `event`. When the event exhausts the retry
    /// bound the error is recorded as [`ChannelError::GaveUp`] before the
    /// state settles, so waiters never observe a stale error.
    fn fail(&self, event: LinkEvent, err: ChannelError, attempts: usize) -> ConnectionState {
        let next = self.state.borrow().on(event, &self.policy);
        if next == ConnectionState::Disconnected {
            self.set_error(Some(ChannelError::GaveUp {
                attempts,
                last: err.to_string(),
            }));
        } else {
            self.set_error(Some(err));
        }
        self.apply(event)
    }

    /// Error that settled the last connect; every waiter reads the same one.
    fn settled_error(&self) -> Option<ChannelError> {
        self.last_error.lock().ok().and_then(|last| last.clone())
    }

    fn set_outbound(&self, outbound: Option<mpsc::UnboundedSender<ClientFrame>>) {
        if let Ok(mut slot) = self.outbound.lock() {
            *slot = outbound;
        }
    }

    fn handler(&self, category: Category) -> Option<Handler> {
        self.handlers
            .lock()
            .ok()
            .and_then(|handlers| handlers.get(&category).map(|r| Arc::clone(&r.handler)))
    }

    fn dispatch(&self, frame: ServerFrame, outbound: &mpsc::UnboundedSender<ClientFrame>) {
        match frame {
            ServerFrame::Event(event) => {
                metrics::counter!("bookwell_channel_events_total", "category" => event.category.as_str())
                    .increment(1);
                match self.handler(event.category) {
                    Some(handler) => handler(event),
                    None => tracing::trace!(category = %event.category, "No handler for event"),
                }
            },
            ServerFrame::Ping => {
                let _ = outbound.send(ClientFrame::Pong);
            },
            ServerFrame::Joined { rooms } => {
                tracing::info!(?rooms, "Joined rooms");
            },
            ServerFrame::Error { message } => {
                tracing::warn!(%message, "Server reported an error");
            },
        }
    }
}

/// Bounded-retry supervisor for one `connect` call.
async fn supervise(inner: Arc<Inner>, identity: Identity) {
    let mut attempts = 0usize;
    loop {
        attempts += 1;
        let outcome =
            tokio::time::timeout(inner.connect_timeout, inner.connector.connect(&identity.credential))
                .await
                .unwrap_or_else(|_| Err(ChannelError::Connection("connect timed out".into())));

        let state = match outcome {
            Ok(Link {
                outbound,
                mut inbound,
            }) => {
                inner.set_error(None);
                let _ = outbound.send(ClientFrame::Join(identity.join_request()));
                inner.set_outbound(Some(outbound.clone()));
                inner.apply(LinkEvent::Opened);
                tracing::info!(user_id = %identity.user_id, "Channel connected");
                attempts = 0;

                while let Some(frame) = inbound.recv().await {
                    inner.dispatch(frame, &outbound);
                }

                inner.set_outbound(None);
                tracing::warn!("Channel connection lost");
                metrics::counter!("bookwell_channel_disconnects_total").increment(1);
                inner.fail(
                    LinkEvent::Lost,
                    ChannelError::Connection("connection lost".into()),
                    attempts,
                )
            },
            Err(ChannelError::CredentialExpired) => {
                tracing::warn!("Channel credential rejected");
                inner.set_error(Some(ChannelError::CredentialExpired));
                inner.apply(LinkEvent::CredentialRejected);
                return;
            },
            Err(err) => {
                tracing::debug!(error = %err, attempts, "Connection attempt failed");
                inner.fail(LinkEvent::Failed, err, attempts)
            },
        };

        match state {
            ConnectionState::Reconnecting { attempt } => {
                metrics::counter!("bookwell_channel_reconnects_total").increment(1);
                tokio::time::sleep(inner.policy.delay_for_attempt(attempt - 1)).await;
                inner.apply(LinkEvent::RetryElapsed);
            },
            ConnectionState::Disconnected => {
                tracing::error!(attempts, "Channel gave up reconnecting");
                return;
            },
            ConnectionState::Connecting { .. } | ConnectionState::Connected => {},
        }
    }
}

/// Handle returned by [`EventChannel::subscribe`].
///
/// Cancelling removes the handler only if it is still the one registered for
/// the category; a newer subscription is left alone.
#[derive(Debug)]
pub struct Subscription {
    category: Category,
    token: u64,
    channel: Weak<Inner>,
}

impl Subscription {
    /// Category this subscription listens to
    #[must_use]
    pub const fn category(&self) -> Category {
        self.category
    }

    /// Remove the handler if it is still current. Returns whether it was.
    pub fn cancel(self) -> bool {
        let Some(inner) = self.channel.upgrade() else {
            return false;
        };
        let Ok(mut handlers) = inner.handlers.lock() else {
            return false;
        };
        if handlers.get(&self.category).is_some_and(|r| r.token == self.token) {
            handlers.remove(&self.category);
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// One persistent bidirectional connection per session.
#[derive(Clone, Debug)]
pub struct EventChannel {
    inner: Arc<Inner>,
}

impl EventChannel {
    /// Channel using `connector` with the retry bounds from `config`
    #[must_use]
    pub fn new(config: &ChannelConfig, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                connector,
                policy: config.retry_policy(),
                connect_timeout: config.connect_timeout,
                state,
                handlers: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(1),
                outbound: Mutex::new(None),
                last_error: Mutex::new(None),
                supervisor: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Connect as `identity` and wait until the channel settles.
    ///
    /// Does nothing if a connection is already active. Otherwise opens a
    /// fresh connection, joins the identity's rooms and returns once
    /// connected, retrying within the configured bound.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::CredentialExpired`]: the server rejected the credential
    /// - [`ChannelError::GaveUp`]: every attempt failed
    /// - [`ChannelError::Closed`]: [`disconnect`](Self::disconnect) was called meanwhile
    #[tracing::instrument(skip_all, fields(user_id = %identity.user_id, role = %identity.role))]
    pub async fn connect(&self, identity: Identity) -> Result<(), ChannelError> {
        let mut state_rx = self.inner.state.subscribe();
        {
            let mut supervisor = self.inner.supervisor.lock().await;
            if self.state() == ConnectionState::Disconnected {
                self.inner.set_error(None);
                self.inner.apply(LinkEvent::ConnectRequested);
                let task = tokio::spawn(supervise(Arc::clone(&self.inner), identity));
                *supervisor = Some(task);
            } else {
                tracing::debug!(state = %self.state(), "Connect ignored: channel already active");
            }
        }

        let settled = state_rx
            .wait_for(|state| state.is_settled())
            .await
            .map(|state| *state)
            .map_err(|_| ChannelError::Closed)?;

        if settled.is_connected() {
            Ok(())
        } else {
            Err(self.inner.settled_error().unwrap_or(ChannelError::Closed))
        }
    }

    /// Tear the connection down.
    ///
    /// Idempotent. Cancels a pending retry, drops the link, clears every
    /// handler and leaves the channel [`ConnectionState::Disconnected`].
    pub async fn disconnect(&self) {
        let task = self.inner.supervisor.lock().await.take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }

        self.inner.set_outbound(None);
        if let Ok(mut handlers) = self.inner.handlers.lock() {
            handlers.clear();
        }
        self.inner.set_error(Some(ChannelError::Closed));
        if self.state() != ConnectionState::Disconnected {
            tracing::info!("Channel disconnected");
        }
        self.inner.apply(LinkEvent::DisconnectRequested);
    }

    /// Register `handler` for `category`, replacing any previous one.
    pub fn subscribe<F>(&self, category: Category, handler: F) -> Subscription
    where
        F: Fn(ServerEvent) + Send + Sync + 'static,
    {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut handlers) = self.inner.handlers.lock() {
            let previous = handlers.insert(
                category,
                Registration {
                    token,
                    handler: Arc::new(handler),
                },
            );
            if previous.is_some() {
                tracing::debug!(%category, "Replaced event handler");
            }
        }
        Subscription {
            category,
            token,
            channel: Arc::downgrade(&self.inner),
        }
    }

    /// Remove the handler for `category`, if any
    pub fn unsubscribe(&self, category: Category) {
        if let Ok(mut handlers) = self.inner.handlers.lock() {
            handlers.remove(&category);
        }
    }

    /// Whether a handler is registered for `category`
    #[must_use]
    pub fn is_subscribed(&self, category: Category) -> bool {
        self.inner
            .handlers
            .lock()
            .is_ok_and(|handlers| handlers.contains_key(&category))
    }

    /// Push an event to the server; dropped when not connected.
    pub fn emit(&self, event: impl Into<String>, payload: Value) {
        let event = event.into();
        let sent = self
            .inner
            .outbound
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .is_some_and(|outbound| {
                outbound
                    .send(ClientFrame::Emit {
                        event: event.clone(),
                        payload,
                    })
                    .is_ok()
            });
        if !sent {
            tracing::debug!(%event, "Emit dropped: channel not connected");
        }
    }

    /// Announce a status change to the other party
    pub fn emit_booking_update(&self, update: &BookingUpdate) {
        match serde_json::to_value(update) {
            Ok(payload) => self.emit(BOOKING_UPDATE_EVENT, payload),
            Err(e) => tracing::error!(error = %e, "Failed to encode booking update"),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// True while connected
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Receiver that observes every state change
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::transport::{MemoryConnector, Scripted, ServerEnd};
    use serde_json::json;
    use std::time::Duration;

    fn channel(retries: usize) -> (EventChannel, Arc<MemoryConnector>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (connector, ends) = MemoryConnector::new();
        let connector = Arc::new(connector);
        let config = ChannelConfig::default().with_max_retries(retries);
        (EventChannel::new(&config, connector.clone()), connector, ends)
    }

    fn identity() -> Identity {
        Identity::new(ParticipantId::new(), Role::Fulfiller, "token-1")
            .with_location(GeoPoint { lat: 40.71, lng: -74.0 })
    }

    fn event(category: Category, id: &str) -> ServerFrame {
        ServerFrame::Event(ServerEvent {
            id: id.to_string(),
            category,
            payload: json!({"message": id}),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn connect_joins_rooms() {
        let (channel, connector, mut ends) = channel(5);
        connector.push([Scripted::Accept]);
        let who = identity();

        channel.connect(who.clone()).await.unwrap();

        assert!(channel.is_connected());
        let mut end = ends.recv().await.unwrap();
        assert_eq!(end.credential, "token-1");
        assert_eq!(
            end.from_client.recv().await,
            Some(ClientFrame::Join(who.join_request()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_when_connected_is_a_no_op() {
        let (channel, connector, _ends) = channel(5);
        connector.push([Scripted::Accept]);
        channel.connect(identity()).await.unwrap();
        channel.connect(identity()).await.unwrap();
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_at_fixed_interval_until_success() {
        let (channel, connector, _ends) = channel(5);
        let refused = || Scripted::Refuse(ChannelError::Connection("refused".into()));
        connector.push([refused(), refused(), Scripted::Accept]);

        let started = tokio::time::Instant::now();
        channel.connect(identity()).await.unwrap();

        assert_eq!(connector.attempts(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_bounded_retries() {
        let (channel, connector, _ends) = channel(5);

        let err = channel.connect(identity()).await.unwrap_err();

        assert!(matches!(err, ChannelError::GaveUp { attempts: 6, .. }), "{err:?}");
        assert_eq!(connector.attempts(), 6);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_see_the_same_failure() {
        let (channel, connector, _ends) = channel(5);
        let first = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.connect(identity()).await })
        };
        let second = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.connect(identity()).await })
        };

        let first = first.await.unwrap().unwrap_err();
        let second = second.await.unwrap().unwrap_err();

        assert!(matches!(first, ChannelError::GaveUp { attempts: 6, .. }), "{first:?}");
        assert_eq!(first, second);
        assert_eq!(connector.attempts(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_credential_is_not_retried() {
        let (channel, connector, _ends) = channel(5);
        connector.push([Scripted::Refuse(ChannelError::CredentialExpired)]);

        assert_eq!(
            channel.connect(identity()).await,
            Err(ChannelError::CredentialExpired)
        );
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_reconnects_with_fresh_link() {
        let (channel, connector, mut ends) = channel(5);
        connector.push([Scripted::Accept, Scripted::Accept]);
        let mut states = channel.watch_state();

        channel.connect(identity()).await.unwrap();
        let first = ends.recv().await.unwrap();
        drop(first);

        states
            .wait_for(|s| matches!(s, ConnectionState::Reconnecting { attempt: 1 }))
            .await
            .unwrap();
        states.wait_for(|s| s.is_connected()).await.unwrap();

        let mut second = ends.recv().await.unwrap();
        assert!(matches!(
            second.from_client.recv().await,
            Some(ClientFrame::Join(_))
        ));
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn events_reach_the_current_handler_only() {
        let (channel, connector, mut ends) = channel(5);
        connector.push([Scripted::Accept]);
        channel.connect(identity()).await.unwrap();
        let end = ends.recv().await.unwrap();

        let (first_tx, mut first_rx) = mpsc::unbounded_channel();
        let (second_tx, mut second_rx) = mpsc::unbounded_channel();
        let stale = channel.subscribe(Category::BookingUpdate, move |e| {
            let _ = first_tx.send(e.id);
        });
        let _current = channel.subscribe(Category::BookingUpdate, move |e| {
            let _ = second_tx.send(e.id);
        });

        end.to_client.send(event(Category::BookingUpdate, "u-1")).unwrap();

        assert_eq!(second_rx.recv().await.as_deref(), Some("u-1"));
        assert!(first_rx.try_recv().is_err());

        assert!(!stale.cancel());
        assert!(channel.is_subscribed(Category::BookingUpdate));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_unsubscribe_remove_handlers() {
        let (channel, _connector, _ends) = channel(5);
        let sub = channel.subscribe(Category::Message, |_| {});
        assert!(sub.cancel());
        assert!(!channel.is_subscribed(Category::Message));

        channel.subscribe(Category::Activity, |_| {});
        channel.unsubscribe(Category::Activity);
        channel.unsubscribe(Category::Activity);
        assert!(!channel.is_subscribed(Category::Activity));
    }

    #[tokio::test(start_paused = true)]
    async fn ping_is_answered() {
        let (channel, connector, mut ends) = channel(5);
        connector.push([Scripted::Accept]);
        channel.connect(identity()).await.unwrap();
        let mut end = ends.recv().await.unwrap();
        let _join = end.from_client.recv().await;

        end.to_client.send(ServerFrame::Ping).unwrap();
        assert_eq!(end.from_client.recv().await, Some(ClientFrame::Pong));
    }

    #[tokio::test(start_paused = true)]
    async fn emit_is_dropped_when_disconnected() {
        let (channel, connector, mut ends) = channel(5);
        channel.emit("booking_update", json!({}));

        connector.push([Scripted::Accept]);
        channel.connect(identity()).await.unwrap();
        let mut end = ends.recv().await.unwrap();
        let _join = end.from_client.recv().await;

        channel.emit("booking_update", json!({"status": "accepted"}));
        assert_eq!(
            end.from_client.recv().await,
            Some(ClientFrame::Emit {
                event: "booking_update".into(),
                payload: json!({"status": "accepted"})
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_retry() {
        let (channel, connector, _ends) = channel(5);
        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.connect(identity()).await })
        };

        let mut states = channel.watch_state();
        states
            .wait_for(|s| matches!(s, ConnectionState::Reconnecting { .. }))
            .await
            .unwrap();
        channel.subscribe(Category::Message, |_| {});

        channel.disconnect().await;
        channel.disconnect().await;

        assert_eq!(waiter.await.unwrap(), Err(ChannelError::Closed));
        let attempts = connector.attempts();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), attempts);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(!channel.is_subscribed(Category::Message));
    }
}
