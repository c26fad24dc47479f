//! x402 payment protocol core for the Conduit gateway.
//!
//! Implements HTTP 402 pay-per-request using EIP-712 signed EIP-3009
//! `receiveWithAuthorization` transfers, settled on-chain through a
//! `PaymentProcessor` / `Escrow` contract pair by a gas-paying relayer.
//!
//! # Settlement model
//!
//! - **Consumer** signs a `ReceiveWithAuthorization` payload authorizing a
//!   token transfer into the escrow contract
//! - **Gateway** gates resources, returns 402 with structured requirements
//! - **Relayer** ([`SettlementEngine`]) verifies the signature off-chain and
//!   submits `PaymentProcessor.processPayment` on-chain, paying the gas
//!
//! The escrow splits every settled amount between the provider's claimable
//! balance and the platform treasury; the gateway mirrors that ledger
//! off-chain for reporting but always reads claimable truth from the chain.

pub mod auth;
pub mod codec;
pub mod constants;
pub mod contracts;
pub mod eip712;
pub mod error;
pub mod payment;
pub mod relayer;
pub mod verify;

use alloy::sol;

// EIP-712 struct for EIP-3009 receive authorizations.
// The sol! macro derives SolStruct which provides eip712_signing_hash().
// Field order and names are consensus-critical: changing them breaks every
// existing signer.
sol! {
    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    struct ReceiveWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

// Re-exports
pub use constants::ChainConfig;
pub use constants::*;
pub use error::X402Error;
pub use payment::*;

pub use relayer::{ConfirmationPolicy, RelayerNonceAllocator, SettlementEngine};
