use alloy::primitives::Address;

/// Conflux eSpace testnet chain ID.
pub const DEFAULT_CHAIN_ID: u64 = 71;

/// CAIP-2 network identifier for the default chain.
pub const DEFAULT_NETWORK: &str = "eip155:71";

/// x402 scheme name for relayer-executed (gas-free for the payer) transfers.
pub const SCHEME_GASLESS: &str = "gasless";

/// Protocol version carried in tunnel envelopes.
pub const X402_VERSION: u32 = 2;

/// Default RPC endpoint for the Conflux eSpace testnet.
pub const DEFAULT_RPC_URL: &str = "https://evmtestnet.confluxrpc.com";

/// Seconds a 402 challenge remains answerable.
pub const CHALLENGE_TIMEOUT_SECS: u64 = 300;

/// Gas limit for `PaymentProcessor.processPayment`. Hardcoded: the nested
/// token + escrow calls make `estimateGas` return UNPREDICTABLE_GAS_LIMIT on
/// the target chain even for transactions that succeed.
pub const PROCESS_PAYMENT_GAS_LIMIT: u64 = 500_000;

/// Gas limit for a direct `receiveWithAuthorization` on the token.
pub const DIRECT_TRANSFER_GAS_LIMIT: u64 = 200_000;

/// Runtime chain configuration. Decouples the engine and wire types from
/// compile-time constants so a single build can target any EVM deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// CAIP-2 identifier, `eip155:<chain_id>`.
    pub network: String,
    pub scheme_name: String,
    /// ERC-20 / EIP-3009 token the gateway settles in.
    pub token_address: Address,
    /// `token.name()`, the EIP-712 domain name. Fetched at startup.
    pub token_name: String,
    pub token_symbol: String,
    pub token_decimals: u8,
    /// Escrow contract: the only valid `to` of a payment authorization.
    pub escrow_address: Address,
    /// PaymentProcessor contract: sole authorized caller of the escrow.
    pub processor_address: Address,
    /// ServiceRegistry contract: on-chain service catalog.
    pub registry_address: Address,
    pub eip712_domain_version: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            network: DEFAULT_NETWORK.to_string(),
            scheme_name: SCHEME_GASLESS.to_string(),
            token_address: Address::ZERO,
            token_name: "Mock USD Coin".to_string(),
            token_symbol: "mUSDC".to_string(),
            token_decimals: 18,
            escrow_address: Address::ZERO,
            processor_address: Address::ZERO,
            registry_address: Address::ZERO,
            eip712_domain_version: "1".to_string(),
        }
    }
}

impl ChainConfig {
    /// CAIP-2 network string for an arbitrary chain id.
    pub fn network_for(chain_id: u64) -> String {
        format!("eip155:{chain_id}")
    }
}
