use thiserror::Error;

/// Errors returned by x402 operations.
///
/// Verification-class variants are terminal but client-correctable (sign a
/// fresh authorization and retry); settlement-class variants require operator
/// attention. The gateway maps each variant to a stable wire code and HTTP
/// status.
#[derive(Debug, Error)]
pub enum X402Error {
    /// Protected path hit without a payment header.
    #[error("payment required")]
    MissingPayment,

    /// Tunnel envelope or signature tuple could not be decoded.
    #[error("invalid payment payload: {0}")]
    InvalidPayload(String),

    /// Echoed `accepted` block does not match the server-issued requirements.
    #[error("accepted requirements mismatch: {0}")]
    BadRequirementsEcho(String),

    /// Authorization `to` is not the escrow contract.
    #[error("authorization destination is not the escrow: {0}")]
    BadDestination(String),

    /// Authorization value is below the service price.
    #[error("insufficient payment value: {0}")]
    InsufficientValue(String),

    /// Current time is outside [valid_after, valid_before).
    #[error("authorization outside validity window: {0}")]
    OutOfWindow(String),

    /// Authorization nonce was already consumed.
    #[error("authorization nonce already used")]
    NonceUsed,

    /// Recovered signer does not match the claimed payer.
    #[error("signature does not recover to payer: {0}")]
    BadSignature(String),

    /// Registry reports the service missing or deactivated.
    #[error("service inactive or unknown: {0}")]
    ServiceInactive(String),

    /// The settlement transaction reverted on-chain.
    #[error("settlement failed: {0}")]
    SettlementFailed(String),

    /// Payment settled but the backing service could not be reached.
    #[error("upstream call failed after settlement: {0}")]
    UpstreamFailed(String),

    /// Confirmation wait exceeded; the transaction may still mine.
    #[error("confirmation wait timed out: {0}")]
    TimedOut(String),

    /// RPC transport or node failure.
    #[error("chain error: {0}")]
    ChainError(String),

    /// Invalid or missing configuration.
    #[error("config error: {0}")]
    ConfigError(String),

    /// Payer exceeded the in-flight limit or is blacklisted.
    #[error("payer rate limited: {0}")]
    RateLimited(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl X402Error {
    /// Stable machine-readable code for the wire (`error` field of JSON
    /// bodies and the settlement failure log).
    pub fn kind(&self) -> &'static str {
        match self {
            X402Error::MissingPayment => "MISSING_PAYMENT",
            X402Error::InvalidPayload(_) => "INVALID_PAYLOAD",
            X402Error::BadRequirementsEcho(_) => "BAD_REQUIREMENTS_ECHO",
            X402Error::BadDestination(_) => "BAD_DESTINATION",
            X402Error::InsufficientValue(_) => "INSUFFICIENT_VALUE",
            X402Error::OutOfWindow(_) => "OUT_OF_WINDOW",
            X402Error::NonceUsed => "NONCE_USED",
            X402Error::BadSignature(_) => "BAD_SIGNATURE",
            X402Error::ServiceInactive(_) => "SERVICE_INACTIVE",
            X402Error::SettlementFailed(_) => "SETTLEMENT_FAILED",
            X402Error::UpstreamFailed(_) => "UPSTREAM_FAILED",
            X402Error::TimedOut(_) => "TIMED_OUT",
            X402Error::ChainError(_) => "CHAIN_ERROR",
            X402Error::ConfigError(_) => "CONFIG_ERROR",
            X402Error::RateLimited(_) => "RATE_LIMITED",
            X402Error::SerdeError(_) => "INVALID_PAYLOAD",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_for_verification_errors() {
        assert_eq!(X402Error::NonceUsed.kind(), "NONCE_USED");
        assert_eq!(
            X402Error::BadDestination("x".into()).kind(),
            "BAD_DESTINATION"
        );
        assert_eq!(
            X402Error::InsufficientValue("x".into()).kind(),
            "INSUFFICIENT_VALUE"
        );
    }

    #[test]
    fn serde_errors_map_to_invalid_payload() {
        let err: X402Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "INVALID_PAYLOAD");
    }
}
