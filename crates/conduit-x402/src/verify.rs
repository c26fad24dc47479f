//! Off-chain authorization checks.
//!
//! Checks run in a fixed order so the cheapest rejections happen first and a
//! chain round-trip (the nonce probe, performed by the engine between
//! [`check_window`] and [`check_signer`]) is never spent on a payload that a
//! pure check would refuse.

use alloy::primitives::{Address, U256};

use crate::eip712::recover_signer;
use crate::payment::SignatureTuple;
use crate::{ChainConfig, X402Error};

/// What the gateway expects an authorization to satisfy for one service call.
#[derive(Debug, Clone, Copy)]
pub struct Expected {
    /// The escrow contract, the only valid destination.
    pub escrow: Address,
    /// The service price in token base units.
    pub price: U256,
}

/// The authorization must pay the escrow, never the processor, the provider
/// or the relayer. Anything else reverts on-chain, so refuse before
/// submission.
pub fn check_destination(tuple: &SignatureTuple, expected: &Expected) -> Result<(), X402Error> {
    if tuple.to != expected.escrow {
        return Err(X402Error::BadDestination(format!(
            "authorization pays {}, escrow is {}",
            tuple.to, expected.escrow
        )));
    }
    Ok(())
}

/// The authorized value must cover the service price.
pub fn check_value(tuple: &SignatureTuple, expected: &Expected) -> Result<(), X402Error> {
    if tuple.value < expected.price {
        return Err(X402Error::InsufficientValue(format!(
            "authorized {} < price {}",
            tuple.value, expected.price
        )));
    }
    Ok(())
}

/// `valid_after < now < valid_before`. Both boundaries reject: an
/// authorization expiring exactly now is already dead by the time it mines.
pub fn check_window(tuple: &SignatureTuple, now: u64) -> Result<(), X402Error> {
    if now <= tuple.valid_after {
        return Err(X402Error::OutOfWindow(format!(
            "not valid until {} (now {now})",
            tuple.valid_after
        )));
    }
    if now >= tuple.valid_before {
        return Err(X402Error::OutOfWindow(format!(
            "expired at {} (now {now})",
            tuple.valid_before
        )));
    }
    Ok(())
}

/// Recover the signer and require it to match the claimed payer.
pub fn check_signer(tuple: &SignatureTuple, config: &ChainConfig) -> Result<Address, X402Error> {
    let recovered = recover_signer(tuple, config)?;
    if recovered != tuple.from {
        return Err(X402Error::BadSignature(format!(
            "recovered {recovered}, claimed {}",
            tuple.from
        )));
    }
    Ok(recovered)
}

/// Current unix time.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
