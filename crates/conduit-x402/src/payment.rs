use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::X402Error;

/// A single entry in the `accepts` array of a 402 challenge.
///
/// `pay_to` must be the escrow contract address; a challenge advertising the
/// provider's wallet or the relayer would make every settlement revert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    /// Required amount in token base units, decimal string.
    pub max_amount_required: String,
    /// Gateway path of the protected resource, `/gateway/<service_id>`.
    pub resource: String,
    pub description: String,
    pub pay_to: Address,
    pub max_timeout_seconds: u64,
    /// Token contract address.
    pub asset: Address,
    pub extra: TokenExtra,
}

/// Token metadata echoed in the challenge so signers can build the EIP-712
/// domain without an extra RPC round-trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenExtra {
    pub symbol: String,
    pub decimals: u8,
    pub token_name: String,
}

/// The 402 response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequiredBody {
    pub error: String,
    pub accepts: Vec<PaymentRequirements>,
}

impl PaymentRequiredBody {
    pub fn new(requirements: PaymentRequirements) -> Self {
        Self {
            error: "Payment Required".to_string(),
            accepts: vec![requirements],
        }
    }
}

/// An EIP-3009 authorization with its split ECDSA signature, as carried in
/// tunnel proofs and agent execute requests.
///
/// Wire format is camelCase; snake_case aliases are accepted because agent
/// clients post the tuple embedded in snake_case request bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignatureTuple {
    pub from: Address,
    pub to: Address,
    #[serde(with = "u256_decimal")]
    pub value: U256,
    #[serde(alias = "valid_after", with = "u64_flexible")]
    pub valid_after: u64,
    #[serde(alias = "valid_before", with = "u64_flexible")]
    pub valid_before: u64,
    pub nonce: B256,
    #[serde(with = "v_flexible")]
    pub v: u8,
    pub r: B256,
    pub s: B256,
}

/// The outer tunnel envelope carried base64-encoded in the
/// `payment-signature` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelEnvelope {
    pub x402_version: u32,
    /// Echo of the server-issued requirements the signer accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<PaymentRequirements>,
    /// base64(JSON(SignatureTuple)).
    pub proof: String,
}

/// Serialize U256 as a decimal string; deserialize from decimal string or
/// JSON number.
mod u256_decimal {
    use alloy::primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<U256, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Str(String),
        }
        match Raw::deserialize(de)? {
            Raw::Num(n) => Ok(U256::from(n)),
            Raw::Str(s) => s
                .parse::<U256>()
                .map_err(|e| serde::de::Error::custom(format!("invalid uint256: {e}"))),
        }
    }
}

/// Serialize u64 as a JSON number; deserialize from number or decimal string.
mod u64_flexible {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Str(String),
        }
        match Raw::deserialize(de)? {
            Raw::Num(n) => Ok(n),
            Raw::Str(s) => s
                .parse::<u64>()
                .map_err(|e| serde::de::Error::custom(format!("invalid uint: {e}"))),
        }
    }
}

/// The recovery id arrives as 27/28, 0/1, or a 0x-hex string depending on
/// the signing library. Normalize on the way in.
mod v_flexible {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u8, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u8(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<u8, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u8),
            Str(String),
        }
        match Raw::deserialize(de)? {
            Raw::Num(n) => Ok(n),
            Raw::Str(s) => {
                let trimmed = s.trim_start_matches("0x");
                let radix = if trimmed.len() == s.len() { 10 } else { 16 };
                u8::from_str_radix(trimmed, radix)
                    .map_err(|e| serde::de::Error::custom(format!("invalid v: {e}")))
            }
        }
    }
}

/// Parse a human decimal amount (e.g. "0.95") into token base units.
/// Integer-only arithmetic; digits beyond `decimals` are rejected.
pub fn parse_decimal_units(amount: &str, decimals: u8) -> Result<U256, X402Error> {
    let cleaned = amount.trim();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(X402Error::InvalidPayload(format!(
            "invalid amount '{amount}'"
        )));
    }

    let (integer_part, fraction_part) = match cleaned.split_once('.') {
        Some((i, f)) => (i, f),
        None => (cleaned, ""),
    };
    if fraction_part.len() > decimals as usize {
        return Err(X402Error::InvalidPayload(format!(
            "amount '{amount}' has more than {decimals} decimal places"
        )));
    }

    let scale = U256::from(10u64).pow(U256::from(decimals));
    let integer: U256 = if integer_part.is_empty() {
        U256::ZERO
    } else {
        integer_part
            .parse()
            .map_err(|e| X402Error::InvalidPayload(format!("invalid amount '{amount}': {e}")))?
    };

    let fraction = if fraction_part.is_empty() {
        U256::ZERO
    } else {
        let digits: U256 = fraction_part
            .parse()
            .map_err(|e| X402Error::InvalidPayload(format!("invalid amount '{amount}': {e}")))?;
        let pad = U256::from(10u64).pow(U256::from(decimals as usize - fraction_part.len()));
        digits * pad
    };

    integer
        .checked_mul(scale)
        .and_then(|i| i.checked_add(fraction))
        .ok_or_else(|| X402Error::InvalidPayload(format!("amount '{amount}' overflows")))
}

/// Format base units as a human decimal string, trimming trailing zeros.
pub fn format_base_units(value: U256, decimals: u8) -> String {
    let scale = U256::from(10u64).pow(U256::from(decimals));
    let integer = value / scale;
    let remainder = value % scale;
    if remainder.is_zero() {
        return integer.to_string();
    }
    let fraction = format!("{:0>width$}", remainder, width = decimals as usize);
    let fraction = fraction.trim_end_matches('0');
    format!("{integer}.{fraction}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn sample_tuple() -> SignatureTuple {
        SignatureTuple {
            from: address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            to: address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
            value: U256::from(1_000_000_000_000_000_000u128),
            valid_after: 0,
            valid_before: 2_000_000_000,
            nonce: B256::repeat_byte(0x01),
            v: 27,
            r: B256::repeat_byte(0x02),
            s: B256::repeat_byte(0x03),
        }
    }

    #[test]
    fn signature_tuple_roundtrips_camel_case() {
        let tuple = sample_tuple();
        let json = serde_json::to_string(&tuple).unwrap();
        assert!(json.contains("validAfter"));
        assert!(json.contains("\"value\":\"1000000000000000000\""));
        let back: SignatureTuple = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tuple);
    }

    #[test]
    fn signature_tuple_accepts_snake_case_and_string_numbers() {
        let json = r#"{
            "from": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "to": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
            "value": "5000000000000000000",
            "valid_after": "0",
            "valid_before": "2000000000",
            "nonce": "0x0101010101010101010101010101010101010101010101010101010101010101",
            "v": "0x1b",
            "r": "0x0202020202020202020202020202020202020202020202020202020202020202",
            "s": "0x0303030303030303030303030303030303030303030303030303030303030303"
        }"#;
        let tuple: SignatureTuple = serde_json::from_str(json).unwrap();
        assert_eq!(tuple.valid_before, 2_000_000_000);
        assert_eq!(tuple.v, 27);
        assert_eq!(tuple.value, U256::from(5_000_000_000_000_000_000u128));
    }

    #[test]
    fn challenge_body_shape() {
        let body = PaymentRequiredBody::new(PaymentRequirements {
            scheme: "gasless".into(),
            network: "eip155:71".into(),
            max_amount_required: "1000000000000000000".into(),
            resource: "/gateway/svc-1".into(),
            description: "Example".into(),
            pay_to: address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
            max_timeout_seconds: 300,
            asset: address!("cccccccccccccccccccccccccccccccccccccccc"),
            extra: TokenExtra {
                symbol: "mUSDC".into(),
                decimals: 18,
                token_name: "Mock USD Coin".into(),
            },
        });
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "Payment Required");
        assert_eq!(json["accepts"][0]["maxAmountRequired"], "1000000000000000000");
        assert_eq!(json["accepts"][0]["extra"]["tokenName"], "Mock USD Coin");
    }

    #[test]
    fn parse_decimal_units_scales() {
        assert_eq!(
            parse_decimal_units("1", 18).unwrap(),
            U256::from(1_000_000_000_000_000_000u128)
        );
        assert_eq!(
            parse_decimal_units("0.95", 18).unwrap(),
            U256::from(950_000_000_000_000_000u128)
        );
        assert_eq!(parse_decimal_units("0.000001", 6).unwrap(), U256::from(1));
    }

    #[test]
    fn parse_decimal_units_rejects_excess_precision() {
        assert!(parse_decimal_units("0.0000001", 6).is_err());
        assert!(parse_decimal_units("abc", 18).is_err());
        assert!(parse_decimal_units("", 18).is_err());
    }

    #[test]
    fn format_base_units_trims() {
        assert_eq!(
            format_base_units(U256::from(950_000_000_000_000_000u128), 18),
            "0.95"
        );
        assert_eq!(format_base_units(U256::from(2u8), 0), "2");
        assert_eq!(format_base_units(U256::ZERO, 18), "0");
    }
}
