//! Tunnel-mode payload codec.
//!
//! Signatures arrive on the `payment-signature` header either directly (a
//! base64 JSON object carrying the v/r/s tuple) or tunneled: a base64 JSON
//! envelope `{x402Version, accepted, proof}` whose `proof` is itself a base64
//! JSON encoding of the tuple. Tunneling exists because several client
//! libraries refuse structured values in payment headers.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::payment::{PaymentRequirements, SignatureTuple, TunnelEnvelope};
use crate::{X402Error, X402_VERSION};

/// A decoded payment header: the signature tuple plus the echoed
/// requirements block when the tunnel envelope carried one.
#[derive(Debug, Clone)]
pub struct DecodedPayment {
    pub signature: SignatureTuple,
    pub accepted: Option<PaymentRequirements>,
}

/// Decode a `payment-signature` header value.
///
/// The outer token is always base64 JSON. If the object has a string `proof`
/// field it is treated as a tunnel envelope and the proof is decoded as the
/// inner signature; otherwise the object itself is parsed as the tuple.
pub fn decode_payment_header(header: &str) -> Result<DecodedPayment, X402Error> {
    let outer = BASE64
        .decode(header.trim())
        .map_err(|e| X402Error::InvalidPayload(format!("header is not base64: {e}")))?;

    let value: serde_json::Value = serde_json::from_slice(&outer)
        .map_err(|e| X402Error::InvalidPayload(format!("header is not JSON: {e}")))?;

    match value.get("proof") {
        Some(serde_json::Value::String(proof)) => {
            let accepted = match value.get("accepted") {
                None | Some(serde_json::Value::Null) => None,
                Some(block) => Some(
                    serde_json::from_value::<PaymentRequirements>(block.clone()).map_err(|e| {
                        X402Error::InvalidPayload(format!("malformed accepted block: {e}"))
                    })?,
                ),
            };
            let inner = BASE64
                .decode(proof.trim())
                .map_err(|e| X402Error::InvalidPayload(format!("proof is not base64: {e}")))?;
            let signature: SignatureTuple = serde_json::from_slice(&inner)
                .map_err(|e| X402Error::InvalidPayload(format!("malformed proof: {e}")))?;
            Ok(DecodedPayment {
                signature,
                accepted,
            })
        }
        Some(_) => Err(X402Error::InvalidPayload(
            "proof must be a base64 string".to_string(),
        )),
        None => {
            let signature: SignatureTuple = serde_json::from_value(value)
                .map_err(|e| X402Error::InvalidPayload(format!("malformed signature: {e}")))?;
            Ok(DecodedPayment {
                signature,
                accepted: None,
            })
        }
    }
}

/// Encode a signature into the tunnel envelope form. Used by clients and
/// tests; the gateway only decodes.
pub fn encode_tunnel(
    signature: &SignatureTuple,
    accepted: Option<&PaymentRequirements>,
) -> Result<String, X402Error> {
    let proof = BASE64.encode(serde_json::to_vec(signature)?);
    let envelope = TunnelEnvelope {
        x402_version: X402_VERSION,
        accepted: accepted.cloned(),
        proof,
    };
    Ok(BASE64.encode(serde_json::to_vec(&envelope)?))
}

/// Check that an echoed `accepted` block matches the server-issued
/// requirements on every field a signer commits to. Cosmetic fields
/// (description, timeout, extra) are not compared.
pub fn requirements_echo_matches(
    accepted: &PaymentRequirements,
    issued: &PaymentRequirements,
) -> Result<(), X402Error> {
    let mismatch = |field: &str| {
        Err(X402Error::BadRequirementsEcho(format!(
            "echoed '{field}' differs from issued requirements"
        )))
    };
    if accepted.scheme != issued.scheme {
        return mismatch("scheme");
    }
    if accepted.network != issued.network {
        return mismatch("network");
    }
    if accepted.max_amount_required != issued.max_amount_required {
        return mismatch("maxAmountRequired");
    }
    if accepted.pay_to != issued.pay_to {
        return mismatch("payTo");
    }
    if accepted.asset != issued.asset {
        return mismatch("asset");
    }
    if accepted.resource != issued.resource {
        return mismatch("resource");
    }
    Ok(())
}
