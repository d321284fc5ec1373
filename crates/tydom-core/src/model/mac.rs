// ── Gateway identity ──
//
// The MAC is both the digest username and the credential-store key, so
// it is normalized once at the edge and never re-parsed downstream.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Gateway MAC, normalized to 12 uppercase hex characters with no
/// separators (`001A25123456`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GatewayMac(String);

impl GatewayMac {
    /// Normalize any common MAC notation.
    ///
    /// Strips `:`, `-` and spaces, uppercases, and requires exactly 12
    /// hex characters. Normalization is idempotent.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, CoreError> {
        let raw = raw.as_ref();
        let normalized: String = raw
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | ' '))
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if normalized.len() != 12 || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidMac {
                value: raw.to_owned(),
            });
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GatewayMac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GatewayMac {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for GatewayMac {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<GatewayMac> for String {
    fn from(mac: GatewayMac) -> Self {
        mac.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_separators_and_case() {
        let mac = GatewayMac::parse("00:1a:25-12 34 56").unwrap();
        assert_eq!(mac.as_str(), "001A25123456");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = GatewayMac::parse("00:1A:25:12:34:56").unwrap();
        let twice = GatewayMac::parse(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(GatewayMac::parse("001A2512345").is_err());
        assert!(GatewayMac::parse("001A2512345678").is_err());
    }

    #[test]
    fn rejects_non_hex() {
        let err = GatewayMac::parse("001A251234GZ").unwrap_err();
        assert!(matches!(err, CoreError::InvalidMac { value } if value == "001A251234GZ"));
    }

    #[test]
    fn serde_roundtrip_normalizes() {
        let mac: GatewayMac = serde_json::from_str("\"00:1a:25:12:34:56\"").unwrap();
        assert_eq!(mac.as_str(), "001A25123456");
        assert_eq!(serde_json::to_string(&mac).unwrap(), "\"001A25123456\"");
    }
}
