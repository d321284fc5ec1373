use thiserror::Error;

/// Top-level error type for the `tydom-api` crate.
///
/// Covers every failure mode of the transport layer: configuration,
/// the digest handshake, the WebSocket session, and the injected cloud
/// collaborators. `tydom-core` wraps these into its own error type.
#[derive(Debug, Error)]
pub enum Error {
    // ── Configuration ───────────────────────────────────────────────
    /// No direct password and no cloud credentials to resolve one.
    #[error("No gateway password and no cloud credentials configured")]
    MissingCredentials,

    /// The cloud password provider returned an empty password.
    #[error("Cloud provider returned an empty gateway password")]
    MissingPassword,

    // ── Handshake ───────────────────────────────────────────────────
    /// The challenge response carried no `www-authenticate` header.
    #[error("Gateway did not send a digest challenge")]
    MissingChallenge,

    /// The `www-authenticate` header could not be parsed.
    #[error("Invalid digest challenge: {0}")]
    InvalidChallenge(String),

    /// Challenge names an algorithm other than MD5.
    #[error("Unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Challenge qop list does not offer `auth`.
    #[error("Unsupported digest qop: {0}")]
    UnsupportedQop(String),

    /// The challenge endpoint answered with something other than a
    /// digest challenge (wrong status, no challenge header).
    #[error("Unexpected challenge response (HTTP {status})")]
    InvalidResponse { status: u16 },

    // ── Transport ───────────────────────────────────────────────────
    /// `send` before `connect` or after the receive loop died.
    #[error("Not connected to the gateway")]
    NotConnected,

    /// HTTP transport error (connection refused, DNS failure, timeout).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// WebSocket upgrade failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// A WebSocket write failed on an established socket.
    #[error("WebSocket send failed: {0}")]
    WebSocketSend(String),

    /// The receive loop died on a transport error. Logged and reflected
    /// in the connection state, never returned from an API call.
    #[error("WebSocket receive failed: {0}")]
    ReceiveFailed(String),

    // ── External collaborators ──────────────────────────────────────
    /// Opaque failure from the cloud password/site provider.
    #[error("Cloud provider error: {message}")]
    Cloud { message: String },
}

impl Error {
    /// Returns `true` if this is a transient transport error worth
    /// retrying from a higher layer.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_) | Self::WebSocketSend(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if connecting again cannot succeed without a
    /// configuration change.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingCredentials | Self::MissingPassword)
    }
}
