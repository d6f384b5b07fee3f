//! Client session: who is signed in, and what an expired credential tears down.
//!
//! The reducer only decides; connecting, disconnecting and discarding the
//! stored credential happen in effects.

use crate::channel::{EventChannel, Identity};
use crate::error::{ApiError, ChannelError, SessionError};
use bookwell_core::{Effect, Reducer, SmallVec, smallvec};
use bookwell_runtime::{Store, StoreError};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default bound on how long [`Session::sign_in`] waits for the channel
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Where the bearer credential lives between runs.
pub trait CredentialStore: Send + Sync {
    /// Stored credential, if any
    fn load(&self) -> Option<String>;
    /// Replace the stored credential
    fn save(&self, credential: &str);
    /// Forget the stored credential
    fn discard(&self);
}

/// Process-local [`CredentialStore`].
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    credential: Mutex<Option<String>>,
}

impl InMemoryCredentialStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn load(&self) -> Option<String> {
        self.credential.lock().ok().and_then(|c| c.clone())
    }

    fn save(&self, credential: &str) {
        if let Ok(mut slot) = self.credential.lock() {
            *slot = Some(credential.to_string());
        }
    }

    fn discard(&self) {
        if let Ok(mut slot) = self.credential.lock() {
            *slot = None;
        }
    }
}

/// Coarse session status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionStatus {
    #[default]
    SignedOut,
    /// Signed in, channel still settling
    Connecting,
    /// Signed in and connected
    Online,
    /// Signed in, but the channel gave up
    Offline,
    /// The credential was rejected; sign in again
    Expired,
}

/// Session state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub status: SessionStatus,
}

/// Session inputs.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionAction {
    /// Store the credential and connect as `identity`
    SignIn(Identity),
    /// Tear down and forget the credential
    SignOut,
    /// Some call was refused with an authorization failure
    CredentialExpired,
    /// The channel settled after a sign-in
    ChannelSettled(Result<(), ChannelError>),
}

/// Dependencies of [`SessionReducer`].
#[derive(Clone)]
pub struct SessionEnvironment {
    pub channel: EventChannel,
    pub credentials: Arc<dyn CredentialStore>,
}

impl fmt::Debug for SessionEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEnvironment")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// Session state transitions.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionReducer;

impl SessionReducer {
    fn teardown(env: &SessionEnvironment) -> Effect<SessionAction> {
        let channel = env.channel.clone();
        let credentials = Arc::clone(&env.credentials);
        Effect::fire(async move {
            credentials.discard();
            channel.disconnect().await;
        })
    }
}

impl Reducer for SessionReducer {
    type State = SessionState;
    type Action = SessionAction;
    type Environment = SessionEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            SessionAction::SignIn(identity) => {
                let replacing = state.identity.is_some();
                state.identity = Some(identity.clone());
                state.status = SessionStatus::Connecting;
                tracing::info!(user_id = %identity.user_id, role = %identity.role, "Signing in");

                let channel = env.channel.clone();
                let credentials = Arc::clone(&env.credentials);
                smallvec![Effect::Future(Box::pin(async move {
                    credentials.save(&identity.credential);
                    if replacing {
                        channel.disconnect().await;
                    }
                    Some(SessionAction::ChannelSettled(channel.connect(identity).await))
                }))]
            },
            SessionAction::ChannelSettled(result) => {
                if state.status != SessionStatus::Connecting {
                    tracing::debug!(status = ?state.status, "Stale channel result ignored");
                    return smallvec![Effect::None];
                }
                match result {
                    Ok(()) => {
                        state.status = SessionStatus::Online;
                        smallvec![Effect::None]
                    },
                    Err(ChannelError::CredentialExpired) => {
                        self.reduce(state, SessionAction::CredentialExpired, env)
                    },
                    Err(err) => {
                        tracing::warn!(error = %err, "Session is offline");
                        state.status = SessionStatus::Offline;
                        smallvec![Effect::None]
                    },
                }
            },
            SessionAction::CredentialExpired => {
                if state.identity.is_none() {
                    return smallvec![Effect::None];
                }
                tracing::warn!("Credential expired; tearing down session");
                state.identity = None;
                state.status = SessionStatus::Expired;
                smallvec![Self::teardown(env)]
            },
            SessionAction::SignOut => {
                if state.identity.is_some() {
                    tracing::info!("Signing out");
                }
                state.identity = None;
                state.status = SessionStatus::SignedOut;
                smallvec![Self::teardown(env)]
            },
        }
    }
}

type Inner = Store<SessionState, SessionAction, SessionEnvironment, SessionReducer>;

/// A client session bound to one [`EventChannel`].
#[derive(Clone)]
pub struct Session {
    store: Inner,
    settle_timeout: Duration,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("settle_timeout", &self.settle_timeout)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Signed-out session
    #[must_use]
    pub fn new(channel: EventChannel, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            store: Store::new(
                SessionState::default(),
                SessionReducer,
                SessionEnvironment {
                    channel,
                    credentials,
                },
            ),
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
        }
    }

    /// Bound how long [`sign_in`](Self::sign_in) waits
    #[must_use]
    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    /// Sign in and wait for the channel to settle.
    ///
    /// # Errors
    ///
    /// [`SessionError::Channel`] with the channel's failure, or
    /// [`SessionError::Store`] when the session store is gone or the channel
    /// did not settle in time.
    pub async fn sign_in(&self, identity: Identity) -> Result<(), SessionError> {
        let mut feedback = self.store.subscribe_actions();
        // the handle covers the connect effect and the reduction of its result
        self.store
            .send(SessionAction::SignIn(identity))
            .await?
            .wait_with_timeout(self.settle_timeout)
            .await?;

        while let Ok(action) = feedback.try_recv() {
            if let SessionAction::ChannelSettled(result) = action {
                return result.map_err(SessionError::from);
            }
        }
        Err(SessionError::Store(StoreError::ChannelClosed))
    }

    /// Sign out and wait for the teardown to finish.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownInProgress`] once the store is shut down.
    pub async fn sign_out(&self) -> Result<(), StoreError> {
        self.store.send(SessionAction::SignOut).await?.wait().await;
        Ok(())
    }

    /// Sign out and stop the session for good.
    ///
    /// Later calls fail with [`StoreError::ShutdownInProgress`].
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownInProgress`] when already closed, or
    /// [`StoreError::ShutdownTimeout`] if the teardown outlives `grace`.
    pub async fn close(&self, grace: Duration) -> Result<(), StoreError> {
        self.sign_out().await?;
        self.store.shutdown(grace).await
    }

    /// Report an expired credential and wait for the teardown.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownInProgress`] once the store is shut down.
    pub async fn expire(&self) -> Result<(), StoreError> {
        self.store
            .send(SessionAction::CredentialExpired)
            .await?
            .wait()
            .await;
        Ok(())
    }

    /// Pass `result` through, expiring the session on a 401.
    pub async fn observe<T>(&self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        if matches!(result, Err(ApiError::CredentialExpired)) {
            if let Err(e) = self.expire().await {
                tracing::warn!(error = %e, "Could not expire session");
            }
        }
        result
    }

    /// Current status
    pub async fn status(&self) -> SessionStatus {
        self.store.state(|s| s.status).await
    }

    /// Signed-in identity
    pub async fn identity(&self) -> Option<Identity> {
        self.store.state(|s| s.identity.clone()).await
    }
}
