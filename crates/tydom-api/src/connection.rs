//! Gateway WebSocket connection.
//!
//! Establishes the digest-authenticated WebSocket session with a Tydom
//! gateway: HTTPS challenge, `Authorization` computation, WebSocket
//! upgrade, then a background receive loop feeding a bounded payload
//! stream. Remote mode (through the vendor relay) prefixes every outgoing
//! frame with `0x02` and strips the same prefix from incoming frames.
//!
//! The connection never reconnects on its own: when the transport fails
//! the receive loop clears the socket handle and the observable state
//! drops to [`ConnectionState::Disconnected`]; a higher layer decides
//! what happens next.

use std::sync::{Arc, Mutex as StdMutex};

use base64::Engine as _;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::cloud::{CloudCredentials, GatewayPasswordProvider};
use crate::digest::{self, DigestChallenge};
use crate::error::Error;
use crate::transport::TransportConfig;

/// Prefix byte applied to every frame when talking through the relay.
pub const REMOTE_COMMAND_PREFIX: u8 = 0x02;

/// Path + query template shared by the challenge and WebSocket URLs.
pub const MEDIATION_PATH: &str = "/mediation/client";

const MESSAGE_CHANNEL_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

// ── Configuration ───────────────────────────────────────────────────

/// Where and how to reach one gateway endpoint.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Gateway host: a LAN IP in local mode, the relay host in remote mode.
    pub host: String,
    /// Gateway MAC, used as the digest username and the `mac` query value.
    pub mac: String,
    /// Remote mode applies the `0x02` command prefix in both directions.
    pub remote: bool,
    pub transport: TransportConfig,
}

impl ConnectionConfig {
    /// `/mediation/client?mac=<MAC>&appli=1` -- also the digest URI.
    pub fn endpoint_path(&self) -> String {
        format!("{MEDIATION_PATH}?mac={}&appli=1", self.mac)
    }

    pub fn challenge_url(&self) -> String {
        format!("https://{}:443{}", self.host, self.endpoint_path())
    }

    pub fn websocket_url(&self) -> String {
        format!("wss://{}:443{}", self.host, self.endpoint_path())
    }
}

/// Password material for the digest handshake.
///
/// Either a direct gateway password or cloud credentials plus a
/// [`GatewayPasswordProvider`] that resolves one. Having neither fails
/// `connect()` with [`Error::MissingCredentials`].
#[derive(Clone, Default)]
pub struct GatewayAuth {
    pub password: Option<SecretString>,
    pub cloud: Option<CloudCredentials>,
    pub provider: Option<Arc<dyn GatewayPasswordProvider>>,
}

impl GatewayAuth {
    pub fn direct(password: SecretString) -> Self {
        Self {
            password: Some(password),
            ..Self::default()
        }
    }

    pub fn via_cloud(
        cloud: CloudCredentials,
        provider: Arc<dyn GatewayPasswordProvider>,
    ) -> Self {
        Self {
            password: None,
            cloud: Some(cloud),
            provider: Some(provider),
        }
    }
}

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

// ── Connection ──────────────────────────────────────────────────────

/// A digest-authenticated WebSocket session with one gateway.
///
/// Cheaply cloneable via `Arc`. The incoming payload stream is created
/// once at construction and survives connect/disconnect cycles, so a
/// consumer can attach once and keep reading across reconnects driven
/// by a higher layer.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    config: ConnectionConfig,
    auth: GatewayAuth,
    random: fn(&mut [u8]),
    state: watch::Sender<ConnectionState>,
    session: StdMutex<Option<reqwest::Client>>,
    sink: Mutex<Option<WsSink>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    cancel: StdMutex<CancellationToken>,
    message_tx: mpsc::Sender<Vec<u8>>,
    message_rx: StdMutex<Option<mpsc::Receiver<Vec<u8>>>>,
    on_disconnect: StdMutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Connection {
    pub fn new(config: ConnectionConfig, auth: GatewayAuth) -> Self {
        Self::with_random_bytes(config, auth, digest::fill_random)
    }

    /// Like [`new`](Self::new) with an injected random source, so tests
    /// get deterministic `Sec-WebSocket-Key` and cnonce values.
    pub fn with_random_bytes(
        config: ConnectionConfig,
        auth: GatewayAuth,
        random: fn(&mut [u8]),
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(ConnectionInner {
                config,
                auth,
                random,
                state,
                session: StdMutex::new(None),
                sink: Mutex::new(None),
                receive_task: Mutex::new(None),
                cancel: StdMutex::new(CancellationToken::new()),
                message_tx,
                message_rx: StdMutex::new(Some(message_rx)),
                on_disconnect: StdMutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Register a callback run exactly once during `disconnect()`,
    /// before the session is invalidated.
    pub fn on_disconnect(&self, callback: impl FnOnce() + Send + 'static) {
        *self.inner.on_disconnect.lock().unwrap() = Some(Box::new(callback));
    }

    /// Subscribe to connection state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.state.borrow() == ConnectionState::Connected
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Perform the full handshake and spawn the receive loop.
    ///
    /// Calling `connect()` on an already connected session is a no-op.
    /// On error the object is left clean: no socket, no session, and
    /// `disconnect()` remains safe to call.
    pub async fn connect(&self) -> Result<(), Error> {
        if self.inner.sink.lock().await.is_some() {
            debug!("connect called while already connected");
            return Ok(());
        }

        self.inner.state.send_replace(ConnectionState::Connecting);
        match self.handshake().await {
            Ok(()) => {
                self.inner.state.send_replace(ConnectionState::Connected);
                debug!(host = %self.inner.config.host, "gateway connected");
                Ok(())
            }
            Err(e) => {
                *self.inner.session.lock().unwrap() = None;
                self.inner.state.send_replace(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<(), Error> {
        let config = &self.inner.config;
        let session = config.transport.build_client()?;
        *self.inner.session.lock().unwrap() = Some(session.clone());

        let password = self.resolve_password(&session).await?;

        // The challenge request carries the WebSocket handshake headers;
        // the gateway refuses to issue a challenge without them.
        let mut key_bytes = [0u8; 16];
        (self.inner.random)(&mut key_bytes);
        let ws_key = base64::engine::general_purpose::STANDARD.encode(key_bytes);

        let challenge_url = config.challenge_url();
        let challenge =
            fetch_challenge(&session, &challenge_url, &config.host, &ws_key).await?;
        let uri = config.endpoint_path();
        let authorization = challenge.authorization_header(
            &config.mac,
            password.expose_secret(),
            "GET",
            &uri,
            &|buf| (self.inner.random)(buf),
        );

        let ws_uri: tungstenite::http::Uri = config
            .websocket_url()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| {
                Error::WebSocketConnect(e.to_string())
            })?;
        let request =
            ClientRequestBuilder::new(ws_uri).with_header("Authorization", authorization);
        let connector = Connector::NativeTls(config.transport.build_tls_connector()?);

        let (ws_stream, _response) =
            connect_async_tls_with_config(request, None, false, Some(connector))
                .await
                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        let (sink, source) = ws_stream.split();
        *self.inner.sink.lock().await = Some(sink);

        let cancel = CancellationToken::new();
        *self.inner.cancel.lock().unwrap() = cancel.clone();

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(receive_loop(inner, source, cancel));
        *self.inner.receive_task.lock().await = Some(handle);

        Ok(())
    }

    /// Resolve the digest password: direct config first, cloud second.
    async fn resolve_password(&self, session: &reqwest::Client) -> Result<SecretString, Error> {
        if let Some(password) = &self.inner.auth.password {
            return Ok(password.clone());
        }
        let (Some(cloud), Some(provider)) =
            (&self.inner.auth.cloud, &self.inner.auth.provider)
        else {
            return Err(Error::MissingCredentials);
        };

        let password = provider
            .fetch_gateway_password(cloud, &self.inner.config.mac, session)
            .await?;
        if password.expose_secret().is_empty() {
            return Err(Error::MissingPassword);
        }
        Ok(password)
    }

    /// Cancel the receive loop, close the socket with a "going away"
    /// reason, run the `on_disconnect` callback, invalidate the session.
    /// Idempotent.
    pub async fn disconnect(&self) {
        let cancel = self.inner.cancel.lock().unwrap().clone();
        cancel.cancel();

        if let Some(handle) = self.inner.receive_task.lock().await.take() {
            let _ = handle.await;
        }

        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            let close = Message::Close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: "going away".into(),
            }));
            if let Err(e) = sink.send(close).await {
                debug!(error = %e, "close frame not delivered");
            }
            let _ = sink.close().await;
        }

        if let Some(callback) = self.inner.on_disconnect.lock().unwrap().take() {
            callback();
        }

        *self.inner.session.lock().unwrap() = None;
        self.inner.state.send_replace(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    // ── Sending ─────────────────────────────────────────────────────

    /// Send a binary payload, applying the remote prefix when needed.
    pub async fn send_bytes(&self, payload: &[u8]) -> Result<(), Error> {
        let mut guard = self.inner.sink.lock().await;
        let sink = guard.as_mut().ok_or(Error::NotConnected)?;
        let framed = apply_prefix(self.inner.config.remote, payload);
        sink.send(Message::Binary(framed))
            .await
            .map_err(|e| Error::WebSocketSend(e.to_string()))
    }

    /// Send a text frame. In remote mode the prefix byte forces the
    /// payload onto the binary path.
    pub async fn send_text(&self, text: &str) -> Result<(), Error> {
        if self.inner.config.remote {
            return self.send_bytes(text.as_bytes()).await;
        }
        let mut guard = self.inner.sink.lock().await;
        let sink = guard.as_mut().ok_or(Error::NotConnected)?;
        sink.send(Message::Text(text.to_owned()))
            .await
            .map_err(|e| Error::WebSocketSend(e.to_string()))
    }

    // ── Receiving ───────────────────────────────────────────────────

    /// Take the incoming payload stream.
    ///
    /// The stream can be taken exactly once; later calls return `None`.
    /// Payloads arrive in receipt order with the remote prefix already
    /// stripped, and keep flowing across reconnect cycles.
    pub fn messages(&self) -> Option<MessageStream> {
        self.inner
            .message_rx
            .lock()
            .unwrap()
            .take()
            .map(MessageStream::new)
    }
}

/// Fetch and parse the digest challenge.
///
/// The GET carries the mandatory WebSocket-handshake headers; without
/// them the gateway answers 404 instead of issuing a challenge. A 401
/// without a `www-authenticate` header is [`Error::MissingChallenge`];
/// any other challenge-less status is [`Error::InvalidResponse`].
pub async fn fetch_challenge(
    session: &reqwest::Client,
    url: &str,
    host: &str,
    ws_key: &str,
) -> Result<DigestChallenge, Error> {
    debug!(url, "requesting digest challenge");

    let response = session
        .get(url)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Host", host)
        .header("Sec-WebSocket-Key", ws_key)
        .header("Sec-WebSocket-Version", "13")
        .send()
        .await?;

    let status = response.status().as_u16();
    let challenge_header = response
        .headers()
        .get(reqwest::header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let Some(challenge_header) = challenge_header else {
        return Err(if status == 401 {
            Error::MissingChallenge
        } else {
            Error::InvalidResponse { status }
        });
    };

    DigestChallenge::parse(&challenge_header)
}

/// Prepend the remote command prefix when in remote mode.
fn apply_prefix(remote: bool, payload: &[u8]) -> Vec<u8> {
    if remote {
        let mut framed = Vec::with_capacity(payload.len() + 1);
        framed.push(REMOTE_COMMAND_PREFIX);
        framed.extend_from_slice(payload);
        framed
    } else {
        payload.to_vec()
    }
}

// ── Receive loop ────────────────────────────────────────────────────

/// Read frames until cancellation, close, or transport failure.
///
/// On any non-cancellation exit the socket handle is cleared so `send`
/// reports [`Error::NotConnected`]; the loop never reconnects.
async fn receive_loop(inner: Arc<ConnectionInner>, mut source: WsSource, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            frame = source.next() => {
                let stop = match frame {
                    Some(Ok(Message::Binary(data))) => forward(&inner, data, &cancel).await,
                    Some(Ok(Message::Text(text))) => {
                        forward(&inner, text.into_bytes(), &cancel).await
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // tungstenite answers pings on its own
                        trace!("websocket keepalive frame");
                        false
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "websocket close frame received");
                        true
                    }
                    Some(Ok(_)) => false,
                    Some(Err(e)) => {
                        warn!(error = %Error::ReceiveFailed(e.to_string()), "receive loop terminating");
                        true
                    }
                    None => {
                        debug!("websocket stream ended");
                        true
                    }
                };
                if stop {
                    break;
                }
            }
        }
    }

    *inner.sink.lock().await = None;
    inner.state.send_replace(ConnectionState::Disconnected);
}

/// Strip the remote prefix and push the payload into the stream.
///
/// Returns `true` when the loop should stop (cancelled mid-send).
async fn forward(inner: &ConnectionInner, mut payload: Vec<u8>, cancel: &CancellationToken) -> bool {
    if inner.config.remote && payload.first() == Some(&REMOTE_COMMAND_PREFIX) {
        payload.remove(0);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => true,
        sent = inner.message_tx.send(payload) => {
            if sent.is_err() {
                trace!("message stream consumer dropped");
            }
            false
        }
    }
}

// ── MessageStream ───────────────────────────────────────────────────

/// Bounded, in-order stream of incoming gateway payloads.
pub struct MessageStream {
    inner: ReceiverStream<Vec<u8>>,
}

impl MessageStream {
    fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
        }
    }

    /// Await the next payload. `None` means the connection was dropped.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.inner.next().await
    }
}

impl futures_core::Stream for MessageStream {
    type Item = Vec<u8>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        std::pin::Pin::new(&mut self.inner).poll_next(cx)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config(remote: bool) -> ConnectionConfig {
        ConnectionConfig {
            host: "192.168.1.20".into(),
            mac: "001A25123456".into(),
            remote,
            transport: TransportConfig::default(),
        }
    }

    #[test]
    fn urls_share_path_and_query() {
        let config = config(false);
        assert_eq!(
            config.challenge_url(),
            "https://192.168.1.20:443/mediation/client?mac=001A25123456&appli=1"
        );
        assert_eq!(
            config.websocket_url(),
            "wss://192.168.1.20:443/mediation/client?mac=001A25123456&appli=1"
        );
    }

    #[test]
    fn remote_mode_prepends_prefix() {
        assert_eq!(apply_prefix(true, b"GET /ping"), {
            let mut expected = vec![REMOTE_COMMAND_PREFIX];
            expected.extend_from_slice(b"GET /ping");
            expected
        });
    }

    #[test]
    fn local_mode_sends_payload_untouched() {
        assert_eq!(apply_prefix(false, b"GET /ping"), b"GET /ping".to_vec());
    }

    #[tokio::test]
    async fn send_before_connect_is_not_connected() {
        let conn = Connection::new(config(false), GatewayAuth::default());
        let err = conn.send_text("GET /ping HTTP/1.1\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn connect_without_credentials_fails_cleanly() {
        let conn = Connection::new(config(false), GatewayAuth::default());
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, Error::MissingCredentials));

        // disconnect must still be safe and idempotent
        conn.disconnect().await;
        conn.disconnect().await;
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn messages_can_only_be_taken_once() {
        let conn = Connection::new(config(false), GatewayAuth::default());
        assert!(conn.messages().is_some());
        assert!(conn.messages().is_none());
    }

    #[tokio::test]
    async fn incoming_prefix_is_stripped_in_remote_mode() {
        let conn = Connection::new(config(true), GatewayAuth::default());
        let mut stream = conn.messages().unwrap();
        let cancel = CancellationToken::new();

        let mut prefixed = vec![REMOTE_COMMAND_PREFIX];
        prefixed.extend_from_slice(b"HTTP/1.1 200 OK\r\n\r\n");
        assert!(!forward(&conn.inner, prefixed, &cancel).await);

        // Payloads without the prefix pass through unchanged.
        assert!(!forward(&conn.inner, b"raw".to_vec(), &cancel).await);

        assert_eq!(stream.recv().await.unwrap(), b"HTTP/1.1 200 OK\r\n\r\n");
        assert_eq!(stream.recv().await.unwrap(), b"raw");
    }

    #[tokio::test]
    async fn on_disconnect_runs_once() {
        let conn = Connection::new(config(false), GatewayAuth::default());
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        conn.on_disconnect(move || {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        conn.disconnect().await;
        conn.disconnect().await;
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
