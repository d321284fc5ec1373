// ── Runtime gateway configuration ──
//
// These types describe *how* to reach a gateway. They carry credential
// data and connection tuning, but never touch disk -- the embedding
// application builds a `GatewayConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;

use tydom_api::{CloudCredentials, ConnectionConfig, TransportConfig, DEFAULT_REMOTE_HOST};

use crate::model::GatewayMac;

/// How to reach the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Direct connection on the LAN.
    Local { host: String },
    /// Through the vendor mediation relay.
    Remote { host: String },
}

impl ConnectionMode {
    /// Remote with the default relay host.
    pub fn remote_default() -> Self {
        Self::Remote {
            host: DEFAULT_REMOTE_HOST.to_owned(),
        }
    }

    pub fn host(&self) -> &str {
        match self {
            Self::Local { host } | Self::Remote { host } => host,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// The frame prefix this mode requires: `0x02` through the relay,
    /// nothing locally.
    pub fn command_prefix(&self) -> Option<u8> {
        self.is_remote().then_some(tydom_api::REMOTE_COMMAND_PREFIX)
    }
}

/// Polling behavior for data the gateway does not push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    /// Seconds between poll rounds. `0` disables polling entirely.
    pub interval_secs: u64,
    /// Pause polling while the injected activity probe reports idle.
    pub only_when_active: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            only_when_active: false,
        }
    }
}

impl PollingConfig {
    pub fn is_enabled(&self) -> bool {
        self.interval_secs > 0
    }
}

/// Configuration for one gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    pub mode: ConnectionMode,
    pub mac: GatewayMac,
    /// Direct gateway password; when absent the cloud credentials are
    /// used to resolve one.
    pub password: Option<SecretString>,
    pub cloud: Option<CloudCredentials>,
    /// Accept the gateway's self-signed certificate.
    pub allow_insecure_tls: bool,
    /// Per-operation HTTP/WebSocket timeout.
    pub timeout: Duration,
    pub polling: PollingConfig,
}

impl GatewayConfig {
    pub fn new(mode: ConnectionMode, mac: GatewayMac) -> Self {
        Self {
            mode,
            mac,
            password: None,
            cloud: None,
            allow_insecure_tls: true,
            timeout: Duration::from_secs(10),
            polling: PollingConfig::default(),
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            allow_insecure_tls: self.allow_insecure_tls,
            timeout: self.timeout,
        }
    }

    /// Transport-layer connection parameters for this config's mode.
    pub fn connection_config(&self) -> ConnectionConfig {
        self.connection_config_for(&self.mode)
    }

    /// Transport-layer connection parameters for an explicit mode,
    /// used by the orchestrator when probing candidates.
    pub fn connection_config_for(&self, mode: &ConnectionMode) -> ConnectionConfig {
        ConnectionConfig {
            host: mode.host().to_owned(),
            mac: self.mac.as_str().to_owned(),
            remote: mode.is_remote(),
            transport: self.transport(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("mode", &self.mode)
            .field("mac", &self.mac)
            .field("has_password", &self.password.is_some())
            .field("has_cloud", &self.cloud.is_some())
            .field("allow_insecure_tls", &self.allow_insecure_tls)
            .field("timeout", &self.timeout)
            .field("polling", &self.polling)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> GatewayMac {
        GatewayMac::parse("001A25123456").unwrap()
    }

    #[test]
    fn remote_mode_implies_command_prefix() {
        let remote = ConnectionMode::remote_default();
        assert_eq!(remote.command_prefix(), Some(0x02));
        assert_eq!(remote.host(), "mediation.tydom.com");

        let local = ConnectionMode::Local {
            host: "192.168.1.20".into(),
        };
        assert_eq!(local.command_prefix(), None);
    }

    #[test]
    fn defaults_match_the_gateway_contract() {
        let config = GatewayConfig::new(ConnectionMode::remote_default(), mac());
        assert!(config.allow_insecure_tls);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.polling.is_enabled());
    }

    #[test]
    fn connection_config_carries_the_mode() {
        let config = GatewayConfig::new(ConnectionMode::remote_default(), mac());
        let conn = config.connection_config();
        assert!(conn.remote);
        assert_eq!(conn.mac, "001A25123456");

        let local = config.connection_config_for(&ConnectionMode::Local {
            host: "10.0.0.5".into(),
        });
        assert!(!local.remote);
        assert_eq!(local.host, "10.0.0.5");
    }

    #[test]
    fn zero_interval_disables_polling() {
        let polling = PollingConfig {
            interval_secs: 0,
            only_when_active: false,
        };
        assert!(!polling.is_enabled());
    }
}
