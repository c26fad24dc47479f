use actix_cors::Cors;
use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Logger, web, App, HttpServer};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conduit_x402::contracts::{assert_deployed, token_metadata};
use conduit_x402::{ChainConfig, ConfirmationPolicy, SettlementEngine};

use conduit_x402_gateway::{
    config::GatewayConfig, db::Database, metrics::register_metrics, routes, state::AppState,
};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from_env().expect("failed to load configuration");
    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();
    let rate_limit_rpm = config.rate_limit_rpm;

    tracing::info!("starting conduit-x402-gateway on port {port}");
    tracing::info!(?config, "configuration loaded");

    // Relayer identity: registry owner and escrow relayer role.
    let signer: PrivateKeySigner = config
        .relayer_private_key
        .parse()
        .expect("invalid RELAYER_PRIVATE_KEY");
    let relayer_address = signer.address();
    tracing::info!("relayer address: {relayer_address:#x}");

    let provider = ProviderBuilder::new()
        .wallet(alloy::network::EthereumWallet::from(signer))
        .connect_http(config.rpc_url.parse().expect("invalid RPC_URL"));

    // Chain id mismatch is fatal: a signature domain bound to the wrong chain
    // would reject every consumer.
    let node_chain_id = provider
        .get_chain_id()
        .await
        .expect("failed to query chain id from RPC");
    if node_chain_id != config.chain_id {
        tracing::error!(
            expected = config.chain_id,
            actual = node_chain_id,
            "CHAIN_ID does not match the RPC node"
        );
        std::process::exit(1);
    }

    // Every configured address must hold contract code.
    for (label, address) in [
        ("PaymentProcessor", config.payment_processor_address),
        ("Escrow", config.escrow_address),
        ("ServiceRegistry", config.service_registry_address),
        ("Token", config.token_address),
    ] {
        if let Err(e) = assert_deployed(&provider, label, address).await {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    }

    // The token's name feeds the EIP-712 domain; fetch once, never guess.
    let (token_name, token_symbol, token_decimals) =
        token_metadata(&provider, config.token_address)
            .await
            .expect("failed to read token metadata");
    tracing::info!(
        token = %config.token_address,
        name = %token_name,
        symbol = %token_symbol,
        decimals = token_decimals,
        "token metadata loaded"
    );

    let chain = ChainConfig {
        chain_id: config.chain_id,
        network: ChainConfig::network_for(config.chain_id),
        scheme_name: conduit_x402::SCHEME_GASLESS.to_string(),
        token_address: config.token_address,
        token_name,
        token_symbol,
        token_decimals,
        escrow_address: config.escrow_address,
        processor_address: config.payment_processor_address,
        registry_address: config.service_registry_address,
        eip712_domain_version: "1".to_string(),
    };

    let policy = if config.optimistic_settlement {
        tracing::warn!(
            "optimistic settlement enabled: success is reported before mining; \
             per-payer rate limits and blacklisting are active"
        );
        ConfirmationPolicy::Optimistic
    } else {
        ConfirmationPolicy::OneConf
    };

    let engine = SettlementEngine::new(
        Arc::new(provider),
        relayer_address,
        chain.clone(),
        policy,
        std::time::Duration::from_secs(config.confirmation_timeout_secs),
    );

    // Sync the relayer nonce once; allocation is local from here on.
    let chain_nonce = engine
        .sync_relayer_nonce()
        .await
        .expect("failed to sync relayer nonce");
    tracing::info!(nonce = chain_nonce, "relayer nonce synced");

    let db = Database::new(&config.database_url).expect("failed to initialize database");
    tracing::info!("database initialized at: {}", config.database_url);

    register_metrics();

    let state = AppState::new(config, chain, db, engine);
    let state_data = web::Data::new(state);

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm as u64)
        .finish()
        .expect("failed to create rate limiter config");

    HttpServer::new(move || {
        let allowed = allowed_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _req_head| {
                let origin_str = origin.to_str().unwrap_or("");
                allowed.iter().any(|a| a == "*" || a == origin_str)
            })
            .allowed_methods(vec!["GET", "POST", "PATCH", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                actix_web::http::header::AUTHORIZATION,
                actix_web::http::header::ACCEPT,
                actix_web::http::header::CONTENT_TYPE,
                actix_web::http::header::HeaderName::from_static("payment-signature"),
                actix_web::http::header::HeaderName::from_static("x-delegation-auth"),
            ])
            .max_age(3600);

        App::new()
            .app_data(state_data.clone())
            .app_data(web::PayloadConfig::new(2 * 1024 * 1024)) // 2MB body limit
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Governor::new(&governor_conf))
            .configure(routes::health::configure)
            .configure(routes::services::configure)
            .configure(routes::agent::configure)
            .configure(routes::gateway::configure)
            .configure(routes::verify::configure)
            .configure(routes::revenue::configure)
            .configure(routes::manifest::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
