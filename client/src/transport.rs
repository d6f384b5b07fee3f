//! Connection transports.
//!
//! A [`Connector`] opens one [`Link`] per attempt. The channel never reuses a
//! link: every reconnect asks the connector for a brand-new one.

use crate::error::ChannelError;
use crate::protocol::{ClientFrame, ServerFrame};
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    http::{HeaderValue, StatusCode, header::AUTHORIZATION},
    Message,
};

/// Boxed, sendable future returned by [`Connector::connect`]
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An open connection, seen as two frame queues.
///
/// The link is closed when `inbound` yields `None`; dropping `outbound`
/// closes it from the client side.
#[derive(Debug)]
pub struct Link {
    /// Frames to the server
    pub outbound: mpsc::UnboundedSender<ClientFrame>,
    /// Frames from the server
    pub inbound: mpsc::UnboundedReceiver<ServerFrame>,
}

/// Opens connections on behalf of an [`EventChannel`](crate::EventChannel).
pub trait Connector: Send + Sync {
    /// Open a fresh connection authenticated with `credential`.
    ///
    /// # Errors
    ///
    /// [`ChannelError::CredentialExpired`] when the server rejects the
    /// credential, [`ChannelError::Connection`] for everything else.
    fn connect(&self, credential: &str) -> BoxFuture<'_, Result<Link, ChannelError>>;
}

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Clone, Debug)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Connector for `url` (`ws://` or `wss://`)
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    fn connect(&self, credential: &str) -> BoxFuture<'_, Result<Link, ChannelError>> {
        let bearer = format!("Bearer {credential}");
        Box::pin(async move {
            let mut request = self
                .url
                .as_str()
                .into_client_request()
                .map_err(|e| ChannelError::Connection(e.to_string()))?;
            let header = HeaderValue::from_str(&bearer)
                .map_err(|e| ChannelError::Protocol(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, header);

            let (stream, _) = tokio_tungstenite::connect_async(request)
                .await
                .map_err(|e| match e {
                    tungstenite::Error::Http(response)
                        if response.status() == StatusCode::UNAUTHORIZED =>
                    {
                        ChannelError::CredentialExpired
                    },
                    other => ChannelError::Connection(other.to_string()),
                })?;

            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientFrame>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerFrame>();
            let (mut sink, mut source) = stream.split();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        frame = out_rx.recv() => {
                            let Some(frame) = frame else {
                                let _ = sink.close().await;
                                break;
                            };
                            match serde_json::to_string(&frame) {
                                Ok(json) => {
                                    if sink.send(Message::Text(json)).await.is_err() {
                                        break;
                                    }
                                },
                                Err(e) => tracing::error!(error = %e, "Failed to encode frame"),
                            }
                        },
                        message = source.next() => match message {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerFrame>(&text) {
                                    Ok(frame) => {
                                        if in_tx.send(frame).is_err() {
                                            break;
                                        }
                                    },
                                    Err(e) => tracing::warn!(error = %e, "Dropping malformed frame"),
                                }
                            },
                            Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                            Some(Ok(_)) => {},
                        },
                        () = in_tx.closed() => break,
                    }
                }
                tracing::debug!("WebSocket pump terminated");
            });

            Ok(Link {
                outbound: out_tx,
                inbound: in_rx,
            })
        })
    }
}

/// Server side of a [`MemoryConnector`] link.
#[derive(Debug)]
pub struct ServerEnd {
    /// Credential the client connected with
    pub credential: String,
    /// Push frames to the client; drop to simulate a lost connection
    pub to_client: mpsc::UnboundedSender<ServerFrame>,
    /// Frames the client sent
    pub from_client: mpsc::UnboundedReceiver<ClientFrame>,
}

/// Scripted outcome of one [`MemoryConnector`] attempt.
#[derive(Clone, Debug)]
pub enum Scripted {
    /// Open a link and hand the server end to the test
    Accept,
    /// Fail the attempt
    Refuse(ChannelError),
}

/// In-process connector driven by a script, for tests.
///
/// Attempts beyond the script are refused.
#[derive(Debug)]
pub struct MemoryConnector {
    script: Mutex<VecDeque<Scripted>>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    /// Connector plus the stream of accepted server ends
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        (
            Self {
                script: Mutex::new(VecDeque::new()),
                accepted,
                attempts: AtomicUsize::new(0),
            },
            rx,
        )
    }

    /// Queue outcomes for the next attempts
    pub fn push(&self, outcomes: impl IntoIterator<Item = Scripted>) {
        if let Ok(mut script) = self.script.lock() {
            script.extend(outcomes);
        }
    }

    /// Attempts made so far
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, credential: &str) -> BoxFuture<'_, Result<Link, ChannelError>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| Scripted::Refuse(ChannelError::Connection("no server".into())));
        let credential = credential.to_string();

        Box::pin(async move {
            match next {
                Scripted::Refuse(err) => Err(err),
                Scripted::Accept => {
                    let (out_tx, out_rx) = mpsc::unbounded_channel();
                    let (in_tx, in_rx) = mpsc::unbounded_channel();
                    self.accepted
                        .send(ServerEnd {
                            credential,
                            to_client: in_tx,
                            from_client: out_rx,
                        })
                        .map_err(|_| ChannelError::Connection("server end dropped".into()))?;
                    Ok(Link {
                        outbound: out_tx,
                        inbound: in_rx,
                    })
                },
            }
        })
    }
}
