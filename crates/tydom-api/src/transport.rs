// Shared transport configuration for building HTTP and TLS clients.
//
// The digest handshake (reqwest) and the WebSocket upgrade
// (tokio-tungstenite) share TLS and timeout settings through this module,
// avoiding duplicated builder logic.

use std::time::Duration;

use crate::error::Error;

/// Shared transport configuration for the gateway session.
///
/// Tydom gateways ship a self-signed certificate, so insecure TLS is the
/// default. Strict verification can be enabled for setups that front the
/// gateway with a real certificate.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Accept the gateway's self-signed certificate.
    pub allow_insecure_tls: bool,
    /// Per-operation timeout for HTTP and WebSocket I/O.
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            allow_insecure_tls: true,
            timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    ///
    /// Used for the HTTPS digest-challenge request that precedes the
    /// WebSocket upgrade.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(self.allow_insecure_tls)
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    /// Build a `native_tls` connector for the WebSocket upgrade.
    ///
    /// Applies the same certificate policy as [`build_client`](Self::build_client)
    /// so both halves of the handshake trust the same endpoints.
    pub fn build_tls_connector(&self) -> Result<native_tls::TlsConnector, Error> {
        native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(self.allow_insecure_tls)
            .danger_accept_invalid_hostnames(self.allow_insecure_tls)
            .build()
            .map_err(|e| Error::Tls(format!("failed to build TLS connector: {e}")))
    }

    /// Derive the shorter timeout used when probing candidate hosts.
    pub fn probe_timeout(&self) -> Duration {
        self.timeout.min(Duration::from_secs(2))
    }

    /// Copy of this config with the probe timeout applied.
    pub fn for_probe(&self) -> Self {
        Self {
            allow_insecure_tls: self.allow_insecure_tls,
            timeout: self.probe_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_insecure_tls() {
        let config = TransportConfig::default();
        assert!(config.allow_insecure_tls);
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[test]
    fn probe_timeout_is_capped_at_two_seconds() {
        let config = TransportConfig::default();
        assert_eq!(config.probe_timeout(), Duration::from_secs(2));

        let short = TransportConfig {
            timeout: Duration::from_secs(1),
            ..TransportConfig::default()
        };
        assert_eq!(short.probe_timeout(), Duration::from_secs(1));
    }
}
