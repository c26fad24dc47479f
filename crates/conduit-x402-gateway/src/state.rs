use alloy::network::EthereumWallet;
use alloy::providers::{
    fillers::{
        BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
    },
    Identity, RootProvider,
};
use std::sync::Arc;

use conduit_x402::{ChainConfig, SettlementEngine};

use crate::config::GatewayConfig;
use crate::db::Database;

/// Concrete provider type from `ProviderBuilder::new().wallet(...).connect_http(...)`.
pub type WalletProvider = FillProvider<
    JoinFill<
        JoinFill<
            Identity,
            JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
        >,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider,
>;

/// Shared application state: config, ledger mirror, settlement engine and the
/// upstream HTTP client. Immutable after startup apart from the engine's
/// internal counters.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub chain: Arc<ChainConfig>,
    pub db: Arc<Database>,
    pub engine: Arc<SettlementEngine<WalletProvider>>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        chain: ChainConfig,
        db: Database,
        engine: SettlementEngine<WalletProvider>,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none()) // Prevent SSRF via redirects
            .build()
            .expect("failed to create HTTP client");

        Self {
            config: Arc::new(config),
            chain: Arc::new(chain),
            db: Arc::new(db),
            engine: Arc::new(engine),
            http_client,
        }
    }
}
