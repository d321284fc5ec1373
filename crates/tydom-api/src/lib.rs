//! Async transport layer for DeltaDore Tydom gateways.
//!
//! This crate owns the wire mechanics of the gateway protocol:
//!
//! - **HTTP frame codec** ([`frame`]) — the HTTP/1.1 subset carried inside
//!   WebSocket payloads, with byte-exact command serialization.
//! - **Digest authentication** ([`digest`]) — the MD5 / qop=auth challenge
//!   handshake the gateway requires before the WebSocket upgrade.
//! - **Connection** ([`connection`]) — session lifecycle, remote-mode frame
//!   prefixing, and the bounded incoming payload stream.
//! - **Cloud collaborators** ([`cloud`]) — injected contracts for resolving
//!   gateway passwords and listing sites through the vendor cloud.
//!
//! Higher-level concerns (typed messages, device catalog, polling,
//! mode selection) live in `tydom-core`, which composes this crate.

pub mod cloud;
pub mod connection;
pub mod digest;
pub mod error;
pub mod frame;
pub mod transport;

pub use cloud::{CloudCredentials, GatewayPasswordProvider, Site, SiteProvider, DEFAULT_REMOTE_HOST};
pub use connection::{
    fetch_challenge, Connection, ConnectionConfig, ConnectionState, GatewayAuth, MessageStream,
    REMOTE_COMMAND_PREFIX,
};
pub use digest::DigestChallenge;
pub use error::Error;
pub use frame::{parse_frame, serialize_command, FrameParseError, Headers, HttpFrame};
pub use transport::TransportConfig;
