// ── Connection orchestrator ──
//
// Decides how to reach the gateway: cached LAN address first, then
// discovery + sequential probing, then the remote relay. Every step
// leaves a `Decision` trace so callers can log the full failover story.
// Probes are full connect+disconnect cycles and never leak sockets.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use tydom_api::{Connection, GatewayAuth, GatewayPasswordProvider};

use crate::config::{ConnectionMode, GatewayConfig};
use crate::credentials::{CredentialsVault, StoredGatewayCredentials};
use crate::error::CoreError;

/// User override for mode selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeOverride {
    #[default]
    None,
    ForceLocal,
    ForceRemote,
}

/// How a candidate host was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMethod {
    Bonjour,
    Other(String),
}

/// A host candidate produced by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCandidate {
    pub host: String,
    pub method: DiscoveryMethod,
}

/// Injected "emit candidate hosts" collaborator (mDNS browser, subnet
/// scan, config hints).
#[async_trait]
pub trait HostDiscovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<HostCandidate>, CoreError>;
}

/// Discovery that never finds anything, for setups relying purely on
/// the cached address and the relay.
pub struct NoDiscovery;

#[async_trait]
impl HostDiscovery for NoDiscovery {
    async fn discover(&self) -> Result<Vec<HostCandidate>, CoreError> {
        Ok(Vec::new())
    }
}

/// Seam between the orchestrator and the transport layer, so mode
/// selection is testable without sockets.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    /// Full connect+disconnect cycle against one candidate, with the
    /// shortened probe timeout. Returns whether the handshake succeeded.
    async fn probe(&self, host: &str) -> bool;

    /// Open the long-lived connection for the chosen mode.
    async fn connect(&self, mode: &ConnectionMode) -> Result<Connection, CoreError>;
}

/// Orchestrator states, observable through [`Orchestrator::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    ResolvingCredentials,
    TryingCachedIp,
    Discovering,
    Probing,
    ConnectingLocal,
    ConnectingRemote,
    Connected,
    Failed,
}

/// One trace entry: what was decided and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// The mode this step settled on, if it settled one.
    pub mode: Option<ConnectionMode>,
    pub reason: String,
}

/// The result of a successful orchestration run.
pub struct Outcome {
    pub connection: Connection,
    pub mode: ConnectionMode,
    pub decisions: Vec<Decision>,
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outcome")
            .field("connection", &"Connection { .. }")
            .field("mode", &self.mode)
            .field("decisions", &self.decisions)
            .finish()
    }
}

// ── Orchestrator ────────────────────────────────────────────────────

pub struct Orchestrator {
    config: GatewayConfig,
    vault: CredentialsVault,
    discovery: Arc<dyn HostDiscovery>,
    connector: Arc<dyn GatewayConnector>,
    mode_override: ModeOverride,
    state: watch::Sender<OrchestratorState>,
}

impl Orchestrator {
    pub fn new(
        config: GatewayConfig,
        vault: CredentialsVault,
        discovery: Arc<dyn HostDiscovery>,
        connector: Arc<dyn GatewayConnector>,
        mode_override: ModeOverride,
    ) -> Self {
        let (state, _) = watch::channel(OrchestratorState::Idle);
        Self {
            config,
            vault,
            discovery,
            connector,
            mode_override,
            state,
        }
    }

    /// Subscribe to state transitions.
    pub fn state(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: OrchestratorState) {
        // send_replace stores the state even when nobody subscribed yet.
        self.state.send_replace(state);
    }

    /// Run the full decision algorithm and connect.
    pub async fn run(&self) -> Result<Outcome, CoreError> {
        let mut decisions = Vec::new();

        self.set_state(OrchestratorState::ResolvingCredentials);
        let credentials = match self.resolve_credentials().await? {
            Some(credentials) => credentials,
            None => {
                self.set_state(OrchestratorState::Failed);
                return Err(CoreError::MissingCredentials);
            }
        };

        if self.mode_override == ModeOverride::ForceRemote {
            self.decide(
                &mut decisions,
                Some(self.remote_mode()),
                "remote mode forced by override",
            );
            return self.connect_remote(decisions).await;
        }

        // Cached LAN address first: one probe, no discovery round.
        if let Some(cached) = credentials.cached_local_ip.clone() {
            self.set_state(OrchestratorState::TryingCachedIp);
            if self.connector.probe(&cached).await {
                self.decide(
                    &mut decisions,
                    Some(ConnectionMode::Local {
                        host: cached.clone(),
                    }),
                    format!("cached address {cached} answered the probe"),
                );
                return self.connect_local(cached, decisions).await;
            }
            self.decide(
                &mut decisions,
                None,
                format!("cached address {cached} did not answer"),
            );
        }

        self.set_state(OrchestratorState::Discovering);
        let candidates = match self.discovery.discover().await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "discovery failed");
                Vec::new()
            }
        };
        let candidates = order_candidates(candidates);
        if candidates.is_empty() {
            self.decide(&mut decisions, None, "discovery produced no candidates");
        }

        self.set_state(OrchestratorState::Probing);
        for candidate in candidates {
            if self.connector.probe(&candidate.host).await {
                // Persist the winner so the next startup skips discovery.
                if let Err(e) = self
                    .vault
                    .save_cached_local_ip(&credentials, &candidate.host)
                    .await
                {
                    warn!(error = %e, "could not persist winning host");
                }
                self.decide(
                    &mut decisions,
                    Some(ConnectionMode::Local {
                        host: candidate.host.clone(),
                    }),
                    format!(
                        "candidate {} answered the probe (via {:?})",
                        candidate.host, candidate.method
                    ),
                );
                return self.connect_local(candidate.host, decisions).await;
            }
            debug!(host = %candidate.host, "candidate did not answer");
        }
        self.decide(&mut decisions, None, "no local candidate answered");

        if self.mode_override == ModeOverride::ForceLocal {
            self.set_state(OrchestratorState::Failed);
            return Err(CoreError::LocalUnavailable);
        }

        self.decide(
            &mut decisions,
            Some(self.remote_mode()),
            "falling back to the remote relay",
        );
        self.connect_remote(decisions).await
    }

    /// Load stored credentials, falling back to a record synthesized
    /// from the direct password in the config.
    async fn resolve_credentials(
        &self,
    ) -> Result<Option<StoredGatewayCredentials>, CoreError> {
        if let Some(stored) = self.vault.load_gateway(&self.config.mac).await? {
            return Ok(Some(stored));
        }
        if let Some(password) = &self.config.password {
            use secrecy::ExposeSecret;
            return Ok(Some(StoredGatewayCredentials {
                mac: self.config.mac.clone(),
                password: password.expose_secret().to_owned(),
                cached_local_ip: None,
                updated_at: chrono::Utc::now(),
            }));
        }
        Ok(None)
    }

    fn remote_mode(&self) -> ConnectionMode {
        match &self.config.mode {
            ConnectionMode::Remote { host } => ConnectionMode::Remote { host: host.clone() },
            ConnectionMode::Local { .. } => ConnectionMode::remote_default(),
        }
    }

    fn decide(&self, decisions: &mut Vec<Decision>, mode: Option<ConnectionMode>, reason: impl Into<String>) {
        let reason = reason.into();
        info!(?mode, %reason, "orchestrator decision");
        decisions.push(Decision { mode, reason });
    }

    async fn connect_local(
        &self,
        host: String,
        decisions: Vec<Decision>,
    ) -> Result<Outcome, CoreError> {
        self.set_state(OrchestratorState::ConnectingLocal);
        let mode = ConnectionMode::Local { host };
        match self.connector.connect(&mode).await {
            Ok(connection) => {
                self.set_state(OrchestratorState::Connected);
                Ok(Outcome {
                    connection,
                    mode,
                    decisions,
                })
            }
            Err(e) => {
                self.set_state(OrchestratorState::Failed);
                Err(e)
            }
        }
    }

    async fn connect_remote(&self, decisions: Vec<Decision>) -> Result<Outcome, CoreError> {
        self.set_state(OrchestratorState::ConnectingRemote);
        let mode = self.remote_mode();
        match self.connector.connect(&mode).await {
            Ok(connection) => {
                self.set_state(OrchestratorState::Connected);
                Ok(Outcome {
                    connection,
                    mode,
                    decisions,
                })
            }
            Err(e) => {
                warn!(error = %e, "remote connection failed");
                self.set_state(OrchestratorState::Failed);
                Err(CoreError::LocalAndRemoteUnavailable)
            }
        }
    }
}

/// Bonjour hits first, then everything else, de-duplicated by host with
/// the original relative order preserved.
fn order_candidates(candidates: Vec<HostCandidate>) -> Vec<HostCandidate> {
    let mut seen = HashSet::new();
    let mut ordered: Vec<HostCandidate> = Vec::with_capacity(candidates.len());

    for bonjour_pass in [true, false] {
        for candidate in &candidates {
            let is_bonjour = candidate.method == DiscoveryMethod::Bonjour;
            if is_bonjour == bonjour_pass && seen.insert(candidate.host.clone()) {
                ordered.push(candidate.clone());
            }
        }
    }
    ordered
}

// ── Default connector ───────────────────────────────────────────────

/// Production [`GatewayConnector`] building real [`Connection`]s from
/// the gateway config.
pub struct ConnectionFactory {
    config: GatewayConfig,
    auth: GatewayAuth,
}

impl ConnectionFactory {
    pub fn new(
        config: GatewayConfig,
        provider: Option<Arc<dyn GatewayPasswordProvider>>,
    ) -> Self {
        let auth = GatewayAuth {
            password: config.password.clone(),
            cloud: config.cloud.clone(),
            provider,
        };
        Self { config, auth }
    }
}

#[async_trait]
impl GatewayConnector for ConnectionFactory {
    async fn probe(&self, host: &str) -> bool {
        let mode = ConnectionMode::Local {
            host: host.to_owned(),
        };
        let mut connection_config = self.config.connection_config_for(&mode);
        connection_config.transport = connection_config.transport.for_probe();

        let connection = Connection::new(connection_config, self.auth.clone());
        let answered = match connection.connect().await {
            Ok(()) => true,
            Err(e) => {
                debug!(host, error = %e, "probe failed");
                false
            }
        };
        // Always tear down, success or not -- probes must not leak sockets.
        connection.disconnect().await;
        answered
    }

    async fn connect(&self, mode: &ConnectionMode) -> Result<Connection, CoreError> {
        let connection = Connection::new(
            self.config.connection_config_for(mode),
            self.auth.clone(),
        );
        connection.connect().await?;
        Ok(connection)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
