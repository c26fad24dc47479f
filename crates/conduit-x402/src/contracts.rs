//! Contract bindings and read-side call helpers.
//!
//! Three contracts carry the canonical state: `ServiceRegistry` (catalog),
//! `Escrow` (provider balances + fee split) and `PaymentProcessor` (replay
//! set + settlement entry point). Deployment wiring invariant:
//! `Escrow.owner == PaymentProcessor`, otherwise every settlement reverts.

use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::providers::Provider;
use alloy::sol;

use crate::X402Error;

sol! {
    /// EIP-3009 token surface. The gateway uses the `receive` variant
    /// exclusively: the relayer is not the `from` party, so the
    /// third-party-executable form is the only one that settles.
    #[sol(rpc)]
    interface IEIP3009 {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function balanceOf(address owner) external view returns (uint256);
        function receiveWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
    }

    #[sol(rpc)]
    interface IServiceRegistry {
        function registerService(
            bytes32 serviceId,
            address provider,
            uint256 price,
            string name,
            string endpoint
        ) external;
        function updatePrice(bytes32 serviceId, uint256 price) external;
        function setActive(bytes32 serviceId, bool active) external;
        function getService(bytes32 serviceId)
            external
            view
            returns (
                address provider,
                uint256 price,
                string name,
                string endpoint,
                bool active,
                uint256 createdAt
            );
    }

    #[sol(rpc)]
    interface IEscrow {
        function providerBalances(address provider) external view returns (uint256);
        function platformFeePercent() external view returns (uint256);
        function treasury() external view returns (address);
        function receivePayment(address provider, address payer, uint256 amount) external;
        function withdraw(address provider, uint256 amount) external;
        function claim() external;
    }

    #[sol(rpc)]
    interface IPaymentProcessor {
        function usedNonces(address payer, bytes32 nonce) external view returns (bool);
        function processPayment(
            bytes32 serviceId,
            address from,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
    }
}

/// On-chain key for a service: `keccak256(utf8(service_id))`.
pub fn service_id_hash(service_id: &str) -> B256 {
    keccak256(service_id.as_bytes())
}

/// Fee denominator: `platformFeePercent` is carried in basis points.
pub const FEE_BPS_DENOMINATOR: u64 = 10_000;

/// Split an amount into (platform fee, provider share) at `fee_bps`.
pub fn split_fee(amount: U256, fee_bps: u32) -> (U256, U256) {
    let fee = amount * U256::from(fee_bps) / U256::from(FEE_BPS_DENOMINATOR);
    (fee, amount - fee)
}

/// Fail unless contract code is deployed at `address`. Run at startup for
/// every configured contract so misconfiguration dies before traffic does.
pub async fn assert_deployed<P: Provider>(
    provider: &P,
    label: &str,
    address: Address,
) -> Result<(), X402Error> {
    let code = provider
        .get_code_at(address)
        .await
        .map_err(|e| X402Error::ChainError(format!("get_code_at({label}) failed: {e}")))?;
    if code.is_empty() {
        return Err(X402Error::ConfigError(format!(
            "{label} address {address} has no contract code"
        )));
    }
    Ok(())
}

/// Fetch name/symbol/decimals from the token contract.
pub async fn token_metadata<P: Provider>(
    provider: &P,
    token: Address,
) -> Result<(String, String, u8), X402Error> {
    let contract = IEIP3009::new(token, provider);
    let name = contract
        .name()
        .call()
        .await
        .map_err(|e| X402Error::ChainError(format!("token.name failed: {e}")))?;
    let symbol = contract
        .symbol()
        .call()
        .await
        .map_err(|e| X402Error::ChainError(format!("token.symbol failed: {e}")))?;
    let decimals = contract
        .decimals()
        .call()
        .await
        .map_err(|e| X402Error::ChainError(format!("token.decimals failed: {e}")))?;
    Ok((name, symbol, decimals))
}

/// Probe `PaymentProcessor.usedNonces` for a (payer, nonce) pair. Saves the
/// gas of submitting a settlement the contract is guaranteed to revert.
pub async fn is_nonce_used<P: Provider>(
    provider: &P,
    processor: Address,
    payer: Address,
    nonce: B256,
) -> Result<bool, X402Error> {
    let contract = IPaymentProcessor::new(processor, provider);
    contract
        .usedNonces(payer, nonce)
        .call()
        .await
        .map_err(|e| X402Error::ChainError(format!("usedNonces probe failed: {e}")))
}

/// Read a provider's claimable balance straight from the escrow.
pub async fn provider_balance<P: Provider>(
    provider: &P,
    escrow: Address,
    wallet: Address,
) -> Result<U256, X402Error> {
    let contract = IEscrow::new(escrow, provider);
    contract
        .providerBalances(wallet)
        .call()
        .await
        .map_err(|e| X402Error::ChainError(format!("providerBalances failed: {e}")))
}

/// Read a service record from the registry.
pub async fn get_service<P: Provider>(
    provider: &P,
    registry: Address,
    id_hash: B256,
) -> Result<IServiceRegistry::getServiceReturn, X402Error> {
    let contract = IServiceRegistry::new(registry, provider);
    contract
        .getService(id_hash)
        .call()
        .await
        .map_err(|e| X402Error::ChainError(format!("getService failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_id_hash_matches_keccak_of_utf8() {
        let hash = service_id_hash("svc-1");
        assert_eq!(hash, keccak256(b"svc-1"));
        assert_ne!(hash, service_id_hash("svc-2"));
    }

    #[test]
    fn fee_split_five_percent() {
        let amount = U256::from(1_000_000_000_000_000_000u128);
        let (fee, share) = split_fee(amount, 500);
        assert_eq!(fee, U256::from(50_000_000_000_000_000u128));
        assert_eq!(share, U256::from(950_000_000_000_000_000u128));
        assert_eq!(fee + share, amount);
    }

    #[test]
    fn fee_split_zero_and_full() {
        let amount = U256::from(12_345u64);
        let (fee, share) = split_fee(amount, 0);
        assert_eq!(fee, U256::ZERO);
        assert_eq!(share, amount);

        let (fee, share) = split_fee(amount, 10_000);
        assert_eq!(fee, amount);
        assert_eq!(share, U256::ZERO);
    }

    #[test]
    fn fee_split_rounds_down_in_providers_favor_is_consistent() {
        // 5% of 99 = 4.95 → fee truncates to 4, share 95; sum preserved.
        let (fee, share) = split_fee(U256::from(99u8), 500);
        assert_eq!(fee, U256::from(4u8));
        assert_eq!(share, U256::from(95u8));
    }
}
