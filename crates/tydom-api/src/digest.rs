// HTTP Digest authentication (RFC 2617 subset).
//
// The gateway challenges with `WWW-Authenticate: Digest ...` and accepts
// MD5 with qop=auth only. Random material is injected so the cnonce is
// deterministic under test.

use md5::{Digest, Md5};

use crate::error::Error;

/// Injected random-byte source.
///
/// Production code passes [`fill_random`]; tests pass a closure writing
/// fixed bytes to make the cnonce and response deterministic.
pub type RandomBytes<'a> = &'a dyn Fn(&mut [u8]);

/// Fill `buf` with OS randomness.
pub fn fill_random(buf: &mut [u8]) {
    // getrandom only fails on broken platforms; an all-zero cnonce is
    // still a valid (if weak) client nonce, so ignore the result.
    let _ = getrandom::getrandom(buf);
}

// ── DigestChallenge ─────────────────────────────────────────────────

/// A parsed `WWW-Authenticate: Digest` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    /// Comma-separated qop offer, e.g. `"auth,auth-int"`.
    pub qop: String,
    pub opaque: Option<String>,
    /// `None` is treated as MD5. Anything other than `"MD5"` is rejected.
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    /// Parse a `www-authenticate` header value.
    ///
    /// The `Digest` scheme prefix is matched case-insensitively. Values
    /// are `key=value` pairs separated by commas; values may be
    /// double-quoted with backslash escapes.
    pub fn parse(header: &str) -> Result<Self, Error> {
        let trimmed = header.trim();
        let scheme_matches = trimmed
            .get(..7)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("digest "));
        if !scheme_matches {
            return Err(Error::InvalidChallenge(format!(
                "not a Digest challenge: {trimmed}"
            )));
        }

        let mut realm = None;
        let mut nonce = None;
        let mut qop = None;
        let mut opaque = None;
        let mut algorithm = None;

        for (key, value) in parse_params(&trimmed[7..]) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "qop" => qop = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = Some(value),
                _ => {}
            }
        }

        let challenge = Self {
            realm: realm
                .ok_or_else(|| Error::InvalidChallenge("missing realm".into()))?,
            nonce: nonce
                .ok_or_else(|| Error::InvalidChallenge("missing nonce".into()))?,
            qop: qop.unwrap_or_default(),
            opaque,
            algorithm,
        };
        challenge.validate()?;
        Ok(challenge)
    }

    /// Reject algorithms and qop offers the gateway protocol never uses.
    fn validate(&self) -> Result<(), Error> {
        if let Some(alg) = &self.algorithm {
            // Hook point: extend this match when SHA-256 support lands.
            if alg != "MD5" {
                return Err(Error::UnsupportedAlgorithm(alg.clone()));
            }
        }
        if !self.qop.split(',').any(|q| q.trim() == "auth") {
            return Err(Error::UnsupportedQop(self.qop.clone()));
        }
        Ok(())
    }

    /// Build the `Authorization` header for one request.
    ///
    /// Implements MD5 with qop=auth: `response =
    /// MD5(HA1:nonce:nc:cnonce:auth:HA2)` where `HA1 =
    /// MD5(username:realm:password)` and `HA2 = MD5(method:uri)`.
    pub fn authorization_header(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        random: RandomBytes<'_>,
    ) -> String {
        let mut cnonce_bytes = [0u8; 16];
        random(&mut cnonce_bytes);
        let cnonce = hex::encode(cnonce_bytes);
        let nc = "00000001";

        let ha1 = md5_hex(&format!("{username}:{}:{password}", self.realm));
        let ha2 = md5_hex(&format!("{method}:{uri}"));
        let response = md5_hex(&format!(
            "{ha1}:{}:{nc}:{cnonce}:auth:{ha2}",
            self.nonce
        ));

        let mut header = format!(
            "Digest username=\"{username}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", qop=auth, nc={nc}, cnonce=\"{cnonce}\", response=\"{response}\"",
            self.realm, self.nonce
        );
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{opaque}\""));
        }
        if let Some(algorithm) = &self.algorithm {
            header.push_str(&format!(", algorithm={algorithm}"));
        }
        header
    }
}

/// Lowercase hex MD5 of a string.
pub(crate) fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

// ── Parameter scanning ──────────────────────────────────────────────

/// Scan `key=value` pairs separated by commas.
///
/// Values may be bare tokens or double-quoted strings with backslash
/// escapes. Malformed trailing fragments are dropped rather than erroring;
/// required-field checks happen in the caller.
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        // Skip separators and whitespace before the next key.
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        for c in chars.by_ref() {
            if c == '=' {
                break;
            }
            key.push(c);
        }
        let key = key.trim().to_owned();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut escaped = false;
            for c in chars.by_ref() {
                if escaped {
                    value.push(c);
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    break;
                } else {
                    value.push(c);
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            value = value.trim().to_owned();
        }

        params.push((key, value));
    }

    params
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const CHALLENGE: &str =
        "Digest realm=\"protected area\", nonce=\"nonce-value\", qop=\"auth\"";

    fn fixed_random(buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = i as u8;
        }
    }

    #[test]
    fn parse_minimal_challenge() {
        let challenge = DigestChallenge::parse(CHALLENGE).unwrap();
        assert_eq!(challenge.realm, "protected area");
        assert_eq!(challenge.nonce, "nonce-value");
        assert_eq!(challenge.qop, "auth");
        assert!(challenge.opaque.is_none());
        assert!(challenge.algorithm.is_none());
    }

    #[test]
    fn parse_accepts_unquoted_values_and_md5() {
        let challenge = DigestChallenge::parse(
            "digest realm=\"r\", nonce=abc123, qop=auth, algorithm=MD5, opaque=\"xyz\"",
        )
        .unwrap();
        assert_eq!(challenge.nonce, "abc123");
        assert_eq!(challenge.algorithm.as_deref(), Some("MD5"));
        assert_eq!(challenge.opaque.as_deref(), Some("xyz"));
    }

    #[test]
    fn parse_unescapes_quoted_values() {
        let challenge = DigestChallenge::parse(
            "Digest realm=\"say \\\"hi\\\"\", nonce=\"n\", qop=\"auth\"",
        )
        .unwrap();
        assert_eq!(challenge.realm, "say \"hi\"");
    }

    #[test]
    fn rejects_non_digest_scheme() {
        let err = DigestChallenge::parse("Basic realm=\"x\"").unwrap_err();
        assert!(matches!(err, Error::InvalidChallenge(_)));
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let err = DigestChallenge::parse(
            "Digest realm=\"r\", nonce=\"n\", qop=\"auth\", algorithm=SHA-512",
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(alg) if alg == "SHA-512"));
    }

    #[test]
    fn rejects_qop_without_auth() {
        let err =
            DigestChallenge::parse("Digest realm=\"r\", nonce=\"n\", qop=\"auth-int\"")
                .unwrap_err();
        assert!(matches!(err, Error::UnsupportedQop(q) if q == "auth-int"));
    }

    #[test]
    fn missing_realm_is_invalid() {
        let err = DigestChallenge::parse("Digest nonce=\"n\", qop=\"auth\"").unwrap_err();
        assert!(matches!(err, Error::InvalidChallenge(_)));
    }

    #[test]
    fn authorization_header_with_fixed_random() {
        let challenge = DigestChallenge::parse(CHALLENGE).unwrap();
        let header = challenge.authorization_header(
            "user",
            "pass",
            "GET",
            "/mediation/client?mac=AA:BB&appli=1",
            &fixed_random,
        );

        assert!(header.starts_with("Digest username=\"user\", realm=\"protected area\""));
        assert!(header.contains("nonce=\"nonce-value\""));
        assert!(header.contains("uri=\"/mediation/client?mac=AA:BB&appli=1\""));
        assert!(header.contains("qop=auth"));
        assert!(header.contains("nc=00000001"));
        assert!(header.contains("cnonce=\"000102030405060708090a0b0c0d0e0f\""));
        assert!(!header.contains("opaque"));
    }

    #[test]
    fn response_matches_the_md5_formula() {
        let challenge = DigestChallenge::parse(CHALLENGE).unwrap();
        let header = challenge.authorization_header(
            "user",
            "pass",
            "GET",
            "/mediation/client?mac=AA:BB&appli=1",
            &fixed_random,
        );

        let ha1 = md5_hex("user:protected area:pass");
        let ha2 = md5_hex("GET:/mediation/client?mac=AA:BB&appli=1");
        let expected = md5_hex(&format!(
            "{ha1}:nonce-value:00000001:000102030405060708090a0b0c0d0e0f:auth:{ha2}"
        ));

        assert!(header.contains(&format!("response=\"{expected}\"")));
    }

    #[test]
    fn opaque_and_algorithm_are_appended() {
        let challenge = DigestChallenge::parse(
            "Digest realm=\"r\", nonce=\"n\", qop=\"auth\", opaque=\"tok\", algorithm=MD5",
        )
        .unwrap();
        let header =
            challenge.authorization_header("u", "p", "GET", "/x", &fixed_random);
        assert!(header.ends_with("opaque=\"tok\", algorithm=MD5"));
    }
}
