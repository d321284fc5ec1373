//! Domain layer for the Tydom gateway client.
//!
//! Composes the `tydom-api` transport into a typed client core:
//!
//! - [`config`] — gateway configuration and mode selection inputs.
//! - [`model`] — MAC identity, device kinds, typed messages, effects.
//! - [`catalog`] — the concurrent device catalog hydrating data frames.
//! - [`command`] — byte-exact constructors for every gateway operation.
//! - [`decoder`] — `Uri-Origin` routing into typed messages + effects.
//! - [`executor`] — the serialized effect worker and poll scheduler.
//! - [`pipeline`] — raw payloads → decoded message stream.
//! - [`credentials`] — typed vault over an opaque key-value store.
//! - [`orchestrator`] — local/remote mode selection with probing.

pub mod catalog;
pub mod command;
pub mod config;
pub mod credentials;
pub mod decoder;
pub mod error;
pub mod executor;
pub mod model;
pub mod orchestrator;
pub mod pipeline;

// ── Primary re-exports ──────────────────────────────────────────────
pub use catalog::{CacheEntry, CatalogStore, DeviceCatalog, DeviceInfo};
pub use command::{Command, TransactionIds};
pub use config::{ConnectionMode, GatewayConfig, PollingConfig};
pub use credentials::{
    CredentialsVault, KeyValueStore, MemoryStore, SelectedSite, StoredGatewayCredentials,
};
pub use decoder::{DecodedMessage, MessageDecoder, DEFAULT_POLL_URLS};
pub use error::CoreError;
pub use executor::{ActiveProbe, CommandSink, EffectExecutor, EffectHandle, PollSchedule};
pub use model::{CDataChunk, DeviceKind, Effect, GatewayMac, TydomDevice, TydomMessage};
pub use orchestrator::{
    ConnectionFactory, Decision, DiscoveryMethod, GatewayConnector, HostCandidate, HostDiscovery,
    ModeOverride, NoDiscovery, Orchestrator, OrchestratorState, Outcome,
};
pub use pipeline::{hydrate, Pipeline};
