//! Boot token issuance
//!
//! A boot token authorizes one node to fetch its boot image and
//! configuration from the provisioning endpoint. Tokens bind the host id
//! and the hardware address that answered the exchange, carry their issue
//! time, and are signed with a keyed digest so they cannot be forged
//! without the issuer secret. They are minted fresh per request and never
//! persisted.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::Rng as _;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token secret must not be empty")]
    EmptySecret,

    #[error("system clock is before the unix epoch")]
    Clock(#[from] SystemTimeError),
}

/// Opaque boot credential, safe to embed in a URL path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootToken(String);

impl BootToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BootToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stateless token mint shared by all exchanges.
#[derive(Clone, Debug)]
pub struct TokenIssuer {
    secret: Vec<u8>,
}

impl TokenIssuer {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, TokenError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }
        Ok(Self { secret })
    }

    /// Mint a token for one host interface. The nonce makes every mint
    /// unique even for identical inputs in the same second.
    pub fn mint(&self, host_id: &str, mac: &str) -> Result<BootToken, TokenError> {
        let issued = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let nonce: u64 = rand::rng().random();
        let payload = format!("{host_id}|{mac}|{issued}|{nonce:016x}");

        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(b"|");
        hasher.update(payload.as_bytes());
        let sig = hasher.finalize();

        Ok(BootToken(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            URL_SAFE_NO_PAD.encode(sig)
        )))
    }
}
