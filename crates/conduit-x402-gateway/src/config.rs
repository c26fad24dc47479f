use alloy::primitives::Address;
use std::env;
use url::Url;

use conduit_x402::auth::DelegationKey;
use conduit_x402::payment::parse_decimal_units;

use crate::metrics::MetricsExposure;

const DEFAULT_PORT: u16 = 4021;
const DEFAULT_DB_PATH: &str = "./gateway.db";
const DEFAULT_RATE_LIMIT_RPM: u32 = 120;
const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 30;
/// 0.05 expressed in basis points.
const DEFAULT_PLATFORM_FEE_BPS: u32 = 500;

#[derive(Clone)]
pub struct GatewayConfig {
    /// Chain RPC endpoint.
    pub rpc_url: String,
    /// Expected numeric chain id; a mismatch with the node is fatal.
    pub chain_id: u64,
    /// Relayer ECDSA key. Registry owner and escrow relayer role.
    pub relayer_private_key: String,
    pub payment_processor_address: Address,
    pub escrow_address: Address,
    pub service_registry_address: Address,
    pub token_address: Address,
    /// Platform fee in basis points, mirror of `Escrow.platformFeePercent`.
    pub platform_fee_bps: u32,
    /// Report success on broadcast instead of waiting for mining.
    pub optimistic_settlement: bool,
    /// SQLite path for the ledger mirror.
    pub database_url: String,
    /// Absolute URL used to compute canonical `/gateway/<id>` endpoints.
    pub base_url: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub rate_limit_rpm: u32,
    pub confirmation_timeout_secs: u64,
    /// Shared-secret credential for /verify-payment delegation (None = open).
    pub delegation_key: Option<DelegationKey>,
    /// Who may scrape /metrics.
    pub metrics_exposure: MetricsExposure,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("relayer_private_key", &"[REDACTED]")
            .field("payment_processor_address", &self.payment_processor_address)
            .field("escrow_address", &self.escrow_address)
            .field("service_registry_address", &self.service_registry_address)
            .field("token_address", &self.token_address)
            .field("platform_fee_bps", &self.platform_fee_bps)
            .field("optimistic_settlement", &self.optimistic_settlement)
            .field("database_url", &self.database_url)
            .field("base_url", &self.base_url)
            .field("port", &self.port)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("confirmation_timeout_secs", &self.confirmation_timeout_secs)
            .field("delegation_key", &self.delegation_key)
            .field("metrics_exposure", &self.metrics_exposure)
            .finish()
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingRequired(key))
}

fn required_address(key: &'static str) -> Result<Address, ConfigError> {
    let raw = required(key)?;
    raw.parse().map_err(|_| ConfigError::InvalidAddress(raw))
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let rpc_url = env::var("RPC_URL")
            .unwrap_or_else(|_| conduit_x402::DEFAULT_RPC_URL.to_string());
        Url::parse(&rpc_url).map_err(|_| ConfigError::InvalidUrl(rpc_url.clone()))?;

        let chain_id = env::var("CHAIN_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(conduit_x402::DEFAULT_CHAIN_ID);

        let relayer_private_key = required("RELAYER_PRIVATE_KEY")?;

        let payment_processor_address = required_address("PAYMENT_PROCESSOR_ADDRESS")?;
        let escrow_address = required_address("ESCROW_ADDRESS")?;
        let service_registry_address = required_address("SERVICE_REGISTRY_ADDRESS")?;
        let token_address = required_address("TOKEN_ADDRESS")?;

        let platform_fee_bps = match env::var("PLATFORM_FEE_PERCENT") {
            Ok(raw) => parse_fee_percent(&raw)?,
            Err(_) => DEFAULT_PLATFORM_FEE_BPS,
        };

        let optimistic_settlement = env::var("OPTIMISTIC_SETTLEMENT")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| DEFAULT_DB_PATH.to_string())
            .trim_start_matches("sqlite://")
            .to_string();

        let base_url = env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:4021".to_string());
        Url::parse(&base_url).map_err(|_| ConfigError::InvalidUrl(base_url.clone()))?;

        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let allowed_origins: Vec<String> = env::var("ALLOWED_ORIGINS")
            .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|_| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ]
            });

        let rate_limit_rpm = env::var("RATE_LIMIT_RPM")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_RPM);

        let confirmation_timeout_secs = env::var("CONFIRMATION_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CONFIRMATION_TIMEOUT_SECS);

        let delegation_key = env::var("DELEGATION_SHARED_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| DelegationKey::new(s.into_bytes()));

        if let Some(ref key) = delegation_key {
            if key.len() < 32 {
                tracing::warn!(
                    "DELEGATION_SHARED_SECRET is short ({} bytes, recommend >= 32); \
                     use `openssl rand -hex 32` to generate a secure secret",
                    key.len()
                );
            }
        } else {
            tracing::warn!(
                "DELEGATION_SHARED_SECRET not set; /verify-payment accepts unauthenticated callers"
            );
        }

        let metrics_exposure = match env::var("METRICS_TOKEN").ok().filter(|s| !s.is_empty()) {
            Some(token) => MetricsExposure::Bearer(token.into_bytes()),
            None => {
                let open = env::var("METRICS_EXPOSURE")
                    .map(|v| v.eq_ignore_ascii_case("open"))
                    .unwrap_or(false);
                if open {
                    MetricsExposure::Open
                } else {
                    tracing::warn!(
                        "no METRICS_TOKEN and METRICS_EXPOSURE is not 'open'; \
                         /metrics will refuse all scrapes"
                    );
                    MetricsExposure::Closed
                }
            }
        };

        Ok(Self {
            rpc_url,
            chain_id,
            relayer_private_key,
            payment_processor_address,
            escrow_address,
            service_registry_address,
            token_address,
            platform_fee_bps,
            optimistic_settlement,
            database_url,
            base_url,
            port,
            allowed_origins,
            rate_limit_rpm,
            confirmation_timeout_secs,
            delegation_key,
            metrics_exposure,
        })
    }

    /// Canonical gateway endpoint for a service id.
    pub fn gateway_endpoint(&self, service_id: &str) -> String {
        format!(
            "{}/gateway/{}",
            self.base_url.trim_end_matches('/'),
            service_id
        )
    }
}

/// Parse a fractional fee like "0.05" into basis points.
pub fn parse_fee_percent(raw: &str) -> Result<u32, ConfigError> {
    let bps = parse_decimal_units(raw, 4)
        .map_err(|_| ConfigError::InvalidFee(raw.to_string()))?;
    let bps: u64 = bps
        .try_into()
        .map_err(|_| ConfigError::InvalidFee(raw.to_string()))?;
    if bps > conduit_x402::contracts::FEE_BPS_DENOMINATOR {
        return Err(ConfigError::InvalidFee(format!(
            "{raw} exceeds 1.0 (100%)"
        )));
    }
    Ok(bps as u32)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid platform fee: {0}")]
    InvalidFee(String),
}
