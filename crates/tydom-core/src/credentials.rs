// ── Credential persistence ──
//
// The backing store is an opaque async key-value collaborator; this
// module owns the key scheme and the payload shapes. Gateway records are
// keyed by normalized MAC, the selected site by account.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;
use crate::model::GatewayMac;

/// Key under which the selected site is stored.
const SELECTED_SITE_KEY: &str = "account";

/// Opaque async key-value store.
///
/// Implementations may be a keyring, a JSON file, or an in-memory map;
/// the vault never assumes more than get/put of strings.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError>;
    async fn put(&self, key: &str, value: String) -> Result<(), CoreError>;
}

/// Stored credentials for one gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredGatewayCredentials {
    pub mac: GatewayMac,
    pub password: String,
    /// Last LAN address that accepted a connection, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_local_ip: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// The site the user picked on their account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedSite {
    pub id: String,
    pub name: String,
    pub gateway_mac: String,
}

// ── CredentialsVault ────────────────────────────────────────────────

/// Typed facade over the opaque store.
#[derive(Clone)]
pub struct CredentialsVault {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialsVault {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn load_gateway(
        &self,
        mac: &GatewayMac,
    ) -> Result<Option<StoredGatewayCredentials>, CoreError> {
        let Some(raw) = self.store.get(mac.as_str()).await? else {
            return Ok(None);
        };
        let credentials = serde_json::from_str(&raw).map_err(CoreError::store)?;
        Ok(Some(credentials))
    }

    pub async fn save_gateway(
        &self,
        credentials: &StoredGatewayCredentials,
    ) -> Result<(), CoreError> {
        let raw = serde_json::to_string(credentials).map_err(CoreError::store)?;
        self.store.put(credentials.mac.as_str(), raw).await?;
        debug!(mac = %credentials.mac, "gateway credentials saved");
        Ok(())
    }

    /// Update the cached LAN address for a gateway, stamping `updated_at`.
    pub async fn save_cached_local_ip(
        &self,
        credentials: &StoredGatewayCredentials,
        host: &str,
    ) -> Result<StoredGatewayCredentials, CoreError> {
        let updated = StoredGatewayCredentials {
            cached_local_ip: Some(host.to_owned()),
            updated_at: Utc::now(),
            ..credentials.clone()
        };
        self.save_gateway(&updated).await?;
        Ok(updated)
    }

    pub async fn load_selected_site(&self) -> Result<Option<SelectedSite>, CoreError> {
        let Some(raw) = self.store.get(SELECTED_SITE_KEY).await? else {
            return Ok(None);
        };
        let site = serde_json::from_str(&raw).map_err(CoreError::store)?;
        Ok(Some(site))
    }

    pub async fn save_selected_site(&self, site: &SelectedSite) -> Result<(), CoreError> {
        let raw = serde_json::to_string(site).map_err(CoreError::store)?;
        self.store.put(SELECTED_SITE_KEY, raw).await
    }
}

// ── MemoryStore ─────────────────────────────────────────────────────

/// In-memory [`KeyValueStore`], for tests and ephemeral setups.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: String) -> Result<(), CoreError> {
        self.entries.insert(key.to_owned(), value);
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> CredentialsVault {
        CredentialsVault::new(Arc::new(MemoryStore::new()))
    }

    fn credentials() -> StoredGatewayCredentials {
        StoredGatewayCredentials {
            mac: GatewayMac::parse("001A25123456").unwrap(),
            password: "s3cret".into(),
            cached_local_ip: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn gateway_roundtrip_is_keyed_by_mac() {
        let vault = vault();
        let creds = credentials();
        vault.save_gateway(&creds).await.unwrap();

        let loaded = vault.load_gateway(&creds.mac).await.unwrap().unwrap();
        assert_eq!(loaded, creds);

        let other = GatewayMac::parse("AABBCCDDEEFF").unwrap();
        assert!(vault.load_gateway(&other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cached_ip_update_stamps_updated_at() {
        let vault = vault();
        let creds = credentials();
        vault.save_gateway(&creds).await.unwrap();

        let updated = vault
            .save_cached_local_ip(&creds, "10.0.0.5")
            .await
            .unwrap();
        assert_eq!(updated.cached_local_ip.as_deref(), Some("10.0.0.5"));
        assert!(updated.updated_at >= creds.updated_at);

        let loaded = vault.load_gateway(&creds.mac).await.unwrap().unwrap();
        assert_eq!(loaded.cached_local_ip.as_deref(), Some("10.0.0.5"));
    }

    #[tokio::test]
    async fn selected_site_roundtrip() {
        let vault = vault();
        assert!(vault.load_selected_site().await.unwrap().is_none());

        let site = SelectedSite {
            id: "42".into(),
            name: "Home".into(),
            gateway_mac: "001A25123456".into(),
        };
        vault.save_selected_site(&site).await.unwrap();
        assert_eq!(vault.load_selected_site().await.unwrap().unwrap(), site);
    }
}
