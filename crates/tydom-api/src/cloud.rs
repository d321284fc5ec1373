// Cloud collaborator contracts.
//
// The vendor cloud resolves the per-site gateway password and lists the
// account's sites. Both calls are modeled as injected async collaborators:
// the core never performs the OAuth dance itself, it only consumes the
// results. Failures propagate opaquely as [`Error::Cloud`].

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default host of the vendor mediation relay.
pub const DEFAULT_REMOTE_HOST: &str = "mediation.tydom.com";

/// Account credentials for the vendor cloud.
#[derive(Clone)]
pub struct CloudCredentials {
    pub email: String,
    pub password: SecretString,
}

impl std::fmt::Debug for CloudCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never leak the password through Debug output.
        f.debug_struct("CloudCredentials")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// A site registered on the vendor account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Site {
    pub id: String,
    pub name: String,
    pub gateway_mac: String,
}

/// Resolves the site-specific gateway password from the vendor cloud.
#[async_trait]
pub trait GatewayPasswordProvider: Send + Sync {
    /// Perform the vendor OAuth dance and return the password for the
    /// gateway identified by `mac`.
    async fn fetch_gateway_password(
        &self,
        credentials: &CloudCredentials,
        mac: &str,
        session: &reqwest::Client,
    ) -> Result<SecretString, Error>;
}

/// Lists the sites available on a vendor account.
#[async_trait]
pub trait SiteProvider: Send + Sync {
    async fn list_sites(
        &self,
        credentials: &CloudCredentials,
        session: &reqwest::Client,
    ) -> Result<Vec<Site>, Error>;

    /// The raw sites payload, for callers that need fields beyond
    /// [`Site`].
    async fn fetch_sites_payload(
        &self,
        credentials: &CloudCredentials,
        session: &reqwest::Client,
    ) -> Result<serde_json::Value, Error>;
}

/// Wrap an arbitrary collaborator failure into [`Error::Cloud`].
pub fn cloud_error(err: impl std::fmt::Display) -> Error {
    Error::Cloud {
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_the_password() {
        let creds = CloudCredentials {
            email: "user@example.com".into(),
            password: SecretString::from("hunter2".to_owned()),
        };
        let debug = format!("{creds:?}");
        assert!(debug.contains("user@example.com"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn site_roundtrips_through_json() {
        let site = Site {
            id: "123".into(),
            name: "Home".into(),
            gateway_mac: "001A25123456".into(),
        };
        let json = serde_json::to_string(&site).unwrap();
        let back: Site = serde_json::from_str(&json).unwrap();
        assert_eq!(back, site);
    }
}
