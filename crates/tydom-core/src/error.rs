use thiserror::Error;

/// Unified error type for the core crate.
///
/// Transport and handshake failures arrive wrapped from `tydom-api`;
/// the variants below cover what the core layers add on top: MAC
/// validation, the credentials store, discovery, and orchestration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Failure from the transport layer.
    #[error(transparent)]
    Api(#[from] tydom_api::Error),

    /// No stored credentials and no way to fetch them.
    #[error("No gateway credentials available")]
    MissingCredentials,

    /// A MAC address that does not normalize to 12 hex characters.
    #[error("Invalid gateway MAC: {value}")]
    InvalidMac { value: String },

    /// The orchestrator exhausted every local candidate and the remote
    /// relay as well.
    #[error("Gateway unreachable locally and through the remote relay")]
    LocalAndRemoteUnavailable,

    /// Local-only mode was forced and no local candidate answered.
    #[error("Gateway unreachable on the local network")]
    LocalUnavailable,

    /// Failure from the injected key-value store.
    #[error("Credential store error: {message}")]
    Store { message: String },

    /// Failure from the injected discovery collaborator.
    #[error("Discovery error: {message}")]
    Discovery { message: String },
}

impl CoreError {
    /// Wrap an arbitrary store failure.
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store {
            message: err.to_string(),
        }
    }

    /// Wrap an arbitrary discovery failure.
    pub fn discovery(err: impl std::fmt::Display) -> Self {
        Self::Discovery {
            message: err.to_string(),
        }
    }
}
