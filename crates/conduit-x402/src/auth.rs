//! Delegation-call authentication.
//!
//! External services that offload verify+settle to the gateway hold a shared
//! secret and prove possession per request: the `X-Delegation-Auth` header
//! carries HMAC-SHA256 over a fixed domain tag plus the raw request body.
//! The tag pins the MAC to this surface, so a captured value cannot be
//! replayed against anything else the same secret might ever sign.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Domain separator mixed into every delegation MAC.
const DELEGATION_TAG: &[u8] = b"conduit-delegation-v1";

/// Shared-secret credential for the delegation surface.
///
/// One side calls [`sign`](Self::sign) when posting to `/verify-payment`;
/// the gateway calls [`authenticate`](Self::authenticate) on the raw body
/// before parsing a byte of it.
#[derive(Clone)]
pub struct DelegationKey {
    secret: Vec<u8>,
}

impl DelegationKey {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Secret length in bytes. Callers warn below 32.
    pub fn len(&self) -> usize {
        self.secret.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secret.is_empty()
    }

    fn mac(&self, body: &[u8]) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(DELEGATION_TAG);
        mac.update(body);
        mac
    }

    /// Produce the header value for a request body: lowercase hex MAC.
    pub fn sign(&self, body: &[u8]) -> String {
        alloy::hex::encode(self.mac(body).finalize().into_bytes())
    }

    /// Check a presented header value against the body.
    ///
    /// Malformed hex is verified against a zero MAC so the rejection path
    /// costs the same as a wrong-but-well-formed one.
    pub fn authenticate(&self, body: &[u8], presented: &str) -> bool {
        let presented = alloy::hex::decode(presented.trim()).unwrap_or_else(|_| vec![0u8; 32]);
        self.mac(body).verify_slice(&presented).is_ok()
    }
}

impl std::fmt::Debug for DelegationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DelegationKey([REDACTED])")
    }
}
