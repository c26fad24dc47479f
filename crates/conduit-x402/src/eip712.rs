//! EIP-712 signing hashes and signer recovery for receive authorizations.
//!
//! The domain binds signatures to the token contract: `{name: token.name(),
//! version: "1", chainId, verifyingContract: token}`. This must stay stable;
//! changing any component invalidates every signature in the wild.

use alloy::primitives::{Address, FixedBytes, Signature, B256, U256};
use alloy::sol_types::SolStruct;

use crate::payment::SignatureTuple;
use crate::{ChainConfig, ReceiveWithAuthorization, X402Error};

/// Build the EIP-712 domain for the configured token.
pub fn payment_domain(config: &ChainConfig) -> alloy::sol_types::Eip712Domain {
    alloy::sol_types::Eip712Domain {
        name: Some(std::borrow::Cow::Owned(config.token_name.clone())),
        version: Some(std::borrow::Cow::Owned(
            config.eip712_domain_version.clone(),
        )),
        chain_id: Some(U256::from(config.chain_id)),
        verifying_contract: Some(config.token_address),
        salt: None,
    }
}

/// Typed-data view of a signature tuple (drops the v/r/s components).
pub fn authorization_message(tuple: &SignatureTuple) -> ReceiveWithAuthorization {
    ReceiveWithAuthorization {
        from: tuple.from,
        to: tuple.to,
        value: tuple.value,
        validAfter: U256::from(tuple.valid_after),
        validBefore: U256::from(tuple.valid_before),
        nonce: tuple.nonce,
    }
}

/// Compute the EIP-712 signing hash for an authorization.
pub fn signing_hash(tuple: &SignatureTuple, config: &ChainConfig) -> B256 {
    let domain = payment_domain(config);
    authorization_message(tuple).eip712_signing_hash(&domain)
}

/// secp256k1 curve order N / 2. Signatures with s > this are malleable (EIP-2).
const SECP256K1_N_DIV_2: U256 = U256::from_limbs([
    0xBFD25E8CD0364140,
    0xBAAEDCE6AF48A03B,
    0xFFFFFFFFFFFFFFFE,
    0x7FFFFFFFFFFFFFFF,
]);

/// Recover the signer of an authorization from its split (v, r, s) signature.
///
/// Accepts v in {0, 1, 27, 28} and rejects high-s signatures.
pub fn recover_signer(tuple: &SignatureTuple, config: &ChainConfig) -> Result<Address, X402Error> {
    let parity = match tuple.v {
        0 | 27 => false,
        1 | 28 => true,
        other => {
            return Err(X402Error::BadSignature(format!(
                "recovery id must be 0/1/27/28, got {other}"
            )))
        }
    };

    let r = U256::from_be_bytes(tuple.r.0);
    let s = U256::from_be_bytes(tuple.s.0);
    if s > SECP256K1_N_DIV_2 {
        return Err(X402Error::BadSignature(
            "high-s signature rejected (EIP-2 malleability)".to_string(),
        ));
    }

    let sig = Signature::new(r, s, parity);
    let hash = signing_hash(tuple, config);
    sig.recover_address_from_prehash(&hash)
        .map_err(|e| X402Error::BadSignature(format!("recovery failed: {e}")))
}

/// Generate a random 32-byte authorization nonce.
/// Uses `rand::fill` which delegates to the OS CSPRNG.
pub fn random_nonce() -> FixedBytes<32> {
    use alloy::primitives::keccak256;
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    keccak256(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use alloy::signers::local::PrivateKeySigner;
    use alloy::signers::SignerSync;

    fn test_config() -> ChainConfig {
        ChainConfig {
            token_address: address!("865310dc9d0bfe1460cab221b4bf3da2040b94d7"),
            escrow_address: address!("8d4712191fa0a189ab95c58abaf6e19ebea74c7f"),
            ..ChainConfig::default()
        }
    }

    fn signed_tuple(signer: &PrivateKeySigner, config: &ChainConfig) -> SignatureTuple {
        let mut tuple = SignatureTuple {
            from: signer.address(),
            to: config.escrow_address,
            value: U256::from(1_000_000_000_000_000_000u128),
            valid_after: 0,
            valid_before: u32::MAX as u64,
            nonce: random_nonce(),
            v: 0,
            r: B256::ZERO,
            s: B256::ZERO,
        };
        let hash = signing_hash(&tuple, config);
        let sig = signer.sign_hash_sync(&hash).unwrap();
        tuple.v = 27 + u8::from(sig.v());
        tuple.r = B256::from(sig.r());
        tuple.s = B256::from(sig.s());
        tuple
    }

    #[test]
    fn sign_and_recover_roundtrip() {
        let config = test_config();
        let signer = PrivateKeySigner::random();
        let tuple = signed_tuple(&signer, &config);

        let recovered = recover_signer(&tuple, &config).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn recover_accepts_parity_style_v() {
        let config = test_config();
        let signer = PrivateKeySigner::random();
        let mut tuple = signed_tuple(&signer, &config);
        tuple.v -= 27;

        let recovered = recover_signer(&tuple, &config).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn tampered_value_recovers_different_address() {
        let config = test_config();
        let signer = PrivateKeySigner::random();
        let mut tuple = signed_tuple(&signer, &config);
        tuple.value = U256::from(9u8);

        let recovered = recover_signer(&tuple, &config).unwrap();
        assert_ne!(recovered, signer.address());
    }

    #[test]
    fn domain_change_breaks_recovery() {
        let config = test_config();
        let signer = PrivateKeySigner::random();
        let tuple = signed_tuple(&signer, &config);

        let mut other = config.clone();
        other.token_name = "Other Coin".to_string();
        let recovered = recover_signer(&tuple, &other).unwrap();
        assert_ne!(recovered, signer.address());
    }

    #[test]
    fn rejects_invalid_recovery_id() {
        let config = test_config();
        let signer = PrivateKeySigner::random();
        let mut tuple = signed_tuple(&signer, &config);
        tuple.v = 5;

        let err = recover_signer(&tuple, &config).unwrap_err();
        assert_eq!(err.kind(), "BAD_SIGNATURE");
    }

    #[test]
    fn rejects_high_s() {
        let config = test_config();
        let signer = PrivateKeySigner::random();
        let mut tuple = signed_tuple(&signer, &config);
        tuple.s = B256::repeat_byte(0xff);

        let err = recover_signer(&tuple, &config).unwrap_err();
        assert_eq!(err.kind(), "BAD_SIGNATURE");
    }

    #[test]
    fn random_nonces_are_unique() {
        assert_ne!(random_nonce(), random_nonce());
    }
}
