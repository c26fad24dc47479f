use actix_web::{test, web, App};
use alloy::network::EthereumWallet;
use alloy::primitives::{address, Address, B256, U256};
use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;
use std::sync::Arc;

use conduit_x402::auth::DelegationKey;
use conduit_x402::codec::encode_tunnel;
use conduit_x402::payment::SignatureTuple;
use conduit_x402::{ChainConfig, ConfirmationPolicy, SettlementEngine};

use conduit_x402_gateway::config::GatewayConfig;
use conduit_x402_gateway::db::{Database, Service, ServiceKind};
use conduit_x402_gateway::metrics::MetricsExposure;
use conduit_x402_gateway::routes;
use conduit_x402_gateway::state::AppState;

const ESCROW: Address = address!("8d4712191fa0a189ab95c58abaf6e19ebea74c7f");
const PROCESSOR: Address = address!("1111111111111111111111111111111111111111");
const REGISTRY: Address = address!("2222222222222222222222222222222222222222");
const TOKEN: Address = address!("865310dc9d0bfe1460cab221b4bf3da2040b94d7");

/// One token at 18 decimals.
const PRICE: u128 = 1_000_000_000_000_000_000;

fn test_config() -> GatewayConfig {
    GatewayConfig {
        rpc_url: "http://localhost:1".to_string(),
        chain_id: 71,
        relayer_private_key: String::new(),
        payment_processor_address: PROCESSOR,
        escrow_address: ESCROW,
        service_registry_address: REGISTRY,
        token_address: TOKEN,
        platform_fee_bps: 500,
        optimistic_settlement: false,
        database_url: ":memory:".to_string(),
        base_url: "http://localhost:4021".to_string(),
        port: 4021,
        allowed_origins: vec![],
        rate_limit_rpm: 120,
        confirmation_timeout_secs: 30,
        delegation_key: None,
        metrics_exposure: MetricsExposure::Closed,
    }
}

fn test_chain() -> ChainConfig {
    ChainConfig {
        chain_id: 71,
        network: "eip155:71".to_string(),
        token_address: TOKEN,
        escrow_address: ESCROW,
        processor_address: PROCESSOR,
        registry_address: REGISTRY,
        ..ChainConfig::default()
    }
}

/// AppState wired to a dead RPC endpoint: anything that needs the chain
/// fails, everything before the chain round-trip is exercisable.
fn make_state(config: GatewayConfig) -> (web::Data<AppState>, Database) {
    let signer = PrivateKeySigner::random();
    let relayer_address = signer.address();
    let provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .connect_http("http://localhost:1".parse().unwrap());

    let chain = test_chain();
    let engine = SettlementEngine::new(
        Arc::new(provider),
        relayer_address,
        chain.clone(),
        ConfirmationPolicy::OneConf,
        std::time::Duration::from_secs(30),
    );

    let db = Database::new(":memory:").unwrap();
    let db_handle = db.clone();
    let state = AppState::new(config, chain, db, engine);
    (web::Data::new(state), db_handle)
}

fn hosted_service(id: &str) -> Service {
    Service {
        id: id.to_string(),
        name: format!("Service {id}"),
        description: "test fixture".to_string(),
        price: PRICE.to_string(),
        kind: ServiceKind::Hosted,
        content: Some(r#"{"x":42}"#.to_string()),
        endpoint: Some(format!("http://localhost:4021/gateway/{id}")),
        provider_address: "0x3333333333333333333333333333333333333333".to_string(),
        tags: Some("data".to_string()),
        active: true,
        created_at: 1_700_000_000,
    }
}

fn native_service(id: &str) -> Service {
    Service {
        kind: ServiceKind::Native,
        content: None,
        endpoint: None,
        ..hosted_service(id)
    }
}

/// A syntactically valid tuple; signature bytes are junk because the tests
/// below never reach signature recovery (pure checks run first).
fn unsigned_tuple(to: Address, value: u128) -> SignatureTuple {
    SignatureTuple {
        from: address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
        to,
        value: U256::from(value),
        valid_after: 0,
        valid_before: 4_000_000_000,
        nonce: B256::repeat_byte(0x01),
        v: 27,
        r: B256::repeat_byte(0x02),
        s: B256::repeat_byte(0x03),
    }
}

macro_rules! build_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data($state.clone())
                .configure(routes::health::configure)
                .configure(routes::services::configure)
                .configure(routes::agent::configure)
                .configure(routes::gateway::configure)
                .configure(routes::verify::configure)
                .configure(routes::revenue::configure)
                .configure(routes::manifest::configure),
        )
        .await
    };
}

#[actix_rt::test]
async fn health_reports_degraded_rpc_but_stays_up() {
    let (state, _db) = make_state(test_config());
    let app = build_app!(state);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["rpc"], "unreachable");
}

#[actix_rt::test]
async fn empty_catalog_lists_cleanly() {
    let (state, _db) = make_state(test_config());
    let app = build_app!(state);

    let req = test::TestRequest::get().uri("/services").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["count"], 0);
}

#[actix_rt::test]
async fn catalog_entry_carries_requirements_but_not_content() {
    let (state, db) = make_state(test_config());
    db.create_service(&hosted_service("svc-1")).unwrap();
    let app = build_app!(state);

    let req = test::TestRequest::get().uri("/services/svc-1").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;

    let requirements = &body["paymentRequirements"];
    assert_eq!(requirements["payTo"], format!("{ESCROW:#x}"));
    assert_eq!(requirements["asset"], format!("{TOKEN:#x}"));
    assert_eq!(requirements["maxAmountRequired"], PRICE.to_string());
    assert_eq!(requirements["resource"], "/gateway/svc-1");
    // The paid product must not leak through the free catalog.
    assert!(body.get("content").is_none());
}

#[actix_rt::test]
async fn unknown_service_is_404() {
    let (state, _db) = make_state(test_config());
    let app = build_app!(state);

    let req = test::TestRequest::get().uri("/services/ghost").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_rt::test]
async fn protected_path_without_header_gets_challenge() {
    let (state, db) = make_state(test_config());
    db.create_service(&hosted_service("svc-1")).unwrap();
    let app = build_app!(state);

    let req = test::TestRequest::get().uri("/gateway/svc-1").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 402);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Payment Required");
    assert_eq!(body["accepts"][0]["payTo"], format!("{ESCROW:#x}"));
    assert_eq!(body["accepts"][0]["scheme"], "gasless");
    assert_eq!(body["accepts"][0]["network"], "eip155:71");
    assert_eq!(body["accepts"][0]["maxTimeoutSeconds"], 300);
}

#[actix_rt::test]
async fn native_service_rejected_with_guidance() {
    let (state, db) = make_state(test_config());
    db.create_service(&native_service("native-1")).unwrap();
    let app = build_app!(state);

    let req = test::TestRequest::get().uri("/gateway/native-1").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "SERVICE_NOT_MEDIATED");
}

#[actix_rt::test]
async fn deactivated_service_is_gone() {
    let (state, db) = make_state(test_config());
    db.create_service(&hosted_service("svc-1")).unwrap();
    db.update_service("svc-1", None, None, Some(false)).unwrap();
    let app = build_app!(state);

    let req = test::TestRequest::get().uri("/gateway/svc-1").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 410);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "SERVICE_INACTIVE");
}

#[actix_rt::test]
async fn garbage_payment_header_is_bad_request() {
    let (state, db) = make_state(test_config());
    db.create_service(&hosted_service("svc-1")).unwrap();
    let app = build_app!(state);

    let req = test::TestRequest::get()
        .uri("/gateway/svc-1")
        .insert_header(("payment-signature", "!!not-base64!!"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "INVALID_PAYLOAD");
}

#[actix_rt::test]
async fn wrong_destination_rejected_before_submission() {
    let (state, db) = make_state(test_config());
    db.create_service(&hosted_service("svc-1")).unwrap();
    let app = build_app!(state);

    // The common client mistake: paying the processor instead of the escrow.
    let tuple = unsigned_tuple(PROCESSOR, PRICE);
    let header = encode_tunnel(&tuple, None).unwrap();

    let req = test::TestRequest::get()
        .uri("/gateway/svc-1")
        .insert_header(("payment-signature", header))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "BAD_DESTINATION");
}

#[actix_rt::test]
async fn underpaid_authorization_rejected() {
    let (state, db) = make_state(test_config());
    db.create_service(&hosted_service("svc-1")).unwrap();
    let app = build_app!(state);

    let tuple = unsigned_tuple(ESCROW, PRICE / 2);
    let header = encode_tunnel(&tuple, None).unwrap();

    let req = test::TestRequest::get()
        .uri("/gateway/svc-1")
        .insert_header(("payment-signature", header))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "INSUFFICIENT_VALUE");
}

#[actix_rt::test]
async fn expired_authorization_rejected() {
    let (state, db) = make_state(test_config());
    db.create_service(&hosted_service("svc-1")).unwrap();
    let app = build_app!(state);

    let mut tuple = unsigned_tuple(ESCROW, PRICE);
    tuple.valid_before = 1; // long expired
    let header = encode_tunnel(&tuple, None).unwrap();

    let req = test::TestRequest::get()
        .uri("/gateway/svc-1")
        .insert_header(("payment-signature", header))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 402);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "OUT_OF_WINDOW");
}

#[actix_rt::test]
async fn tampered_requirements_echo_rejected() {
    let (state, db) = make_state(test_config());
    let service = hosted_service("svc-1");
    db.create_service(&service).unwrap();

    let issued = conduit_x402_gateway::challenge::service_requirements(&service, &test_chain());
    let mut accepted = issued.clone();
    accepted.max_amount_required = "1".to_string();

    let tuple = unsigned_tuple(ESCROW, PRICE);
    let header = encode_tunnel(&tuple, Some(&accepted)).unwrap();

    let app = build_app!(state);
    let req = test::TestRequest::get()
        .uri("/gateway/svc-1")
        .insert_header(("payment-signature", header))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "BAD_REQUIREMENTS_ECHO");
}

#[actix_rt::test]
async fn failed_onchain_registration_rolls_back_db() {
    let (state, db) = make_state(test_config());
    let app = build_app!(state);

    let req = test::TestRequest::post()
        .uri("/services")
        .set_json(serde_json::json!({
            "id": "new-svc",
            "name": "New Service",
            "price": PRICE.to_string(),
            "kind": "hosted",
            "content": "{\"x\":1}",
            "provider_address": "0x3333333333333333333333333333333333333333",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    // The dead RPC makes registerService fail; creation must roll back.
    assert!(resp.status().is_server_error());
    assert!(db.get_service("new-svc").unwrap().is_none());
}

#[actix_rt::test]
async fn create_service_validates_kind_fields() {
    let (state, _db) = make_state(test_config());
    let app = build_app!(state);

    // hosted without content
    let req = test::TestRequest::post()
        .uri("/services")
        .set_json(serde_json::json!({
            "id": "bad-svc",
            "name": "Bad",
            "price": "1000",
            "kind": "hosted",
            "provider_address": "0x3333333333333333333333333333333333333333",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // zero price
    let req = test::TestRequest::post()
        .uri("/services")
        .set_json(serde_json::json!({
            "id": "free-svc",
            "name": "Free",
            "price": "0",
            "kind": "native",
            "provider_address": "0x3333333333333333333333333333333333333333",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // proxy with a private endpoint
    let req = test::TestRequest::post()
        .uri("/services")
        .set_json(serde_json::json!({
            "id": "ssrf-svc",
            "name": "SSRF",
            "price": "1000",
            "kind": "proxy",
            "endpoint": "https://127.0.0.1/internal",
            "provider_address": "0x3333333333333333333333333333333333333333",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_rt::test]
async fn agent_catalog_includes_signing_info() {
    let (state, db) = make_state(test_config());
    db.create_service(&hosted_service("svc-1")).unwrap();
    let app = build_app!(state);

    let req = test::TestRequest::get()
        .uri("/agent/services/svc-1")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;

    let signing = &body["service"]["signingInfo"];
    assert_eq!(signing["primaryType"], "ReceiveWithAuthorization");
    assert_eq!(signing["domain"]["chainId"], 71);
    assert_eq!(signing["domain"]["verifyingContract"], format!("{TOKEN:#x}"));
    assert_eq!(signing["types"]["ReceiveWithAuthorization"][5]["name"], "nonce");
    assert_eq!(signing["executeEndpoint"], "/agent/execute");
}

#[actix_rt::test]
async fn agent_execute_rejects_wallet_mismatch() {
    let (state, db) = make_state(test_config());
    db.create_service(&hosted_service("svc-1")).unwrap();
    let app = build_app!(state);

    let tuple = unsigned_tuple(ESCROW, PRICE);
    let req = test::TestRequest::post()
        .uri("/agent/execute")
        .set_json(serde_json::json!({
            "service_id": "svc-1",
            "wallet_address": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
            "signature": tuple,
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_rt::test]
async fn agent_execute_accepts_camel_case_aliases() {
    let (state, db) = make_state(test_config());
    db.create_service(&hosted_service("svc-1")).unwrap();
    let app = build_app!(state);

    // camelCase body keys, wrong destination: fails at BAD_DESTINATION, which
    // proves both alias parsing and the check ordering.
    let tuple = unsigned_tuple(PROCESSOR, PRICE);
    let req = test::TestRequest::post()
        .uri("/agent/execute")
        .set_json(serde_json::json!({
            "serviceId": "svc-1",
            "walletAddress": format!("{:#x}", tuple.from),
            "signature": tuple,
            "requestBody": {},
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "BAD_DESTINATION");
}

#[actix_rt::test]
async fn delegation_endpoint_requires_mac_when_key_configured() {
    let key = DelegationKey::new(b"delegation-test-secret".to_vec());
    let mut config = test_config();
    config.delegation_key = Some(key.clone());
    let (state, _db) = make_state(config);
    let app = build_app!(state);

    // Missing header
    let req = test::TestRequest::post()
        .uri("/verify-payment")
        .set_payload("{}")
        .insert_header(("Content-Type", "application/json"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    // Wrong MAC
    let req = test::TestRequest::post()
        .uri("/verify-payment")
        .set_payload("{}")
        .insert_header(("Content-Type", "application/json"))
        .insert_header(("X-Delegation-Auth", "deadbeef"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    // A properly signed body passes auth and fails on the empty body instead.
    let body = b"{}";
    let mac = key.sign(body);
    let req = test::TestRequest::post()
        .uri("/verify-payment")
        .set_payload(&body[..])
        .insert_header(("Content-Type", "application/json"))
        .insert_header(("X-Delegation-Auth", mac))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_rt::test]
async fn metrics_exposure_guards_the_scrape_endpoint() {
    // Closed by default: refused outright.
    let (state, _db) = make_state(test_config());
    let app = build_app!(state);
    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    // Bearer-guarded: wrong token 401, right token scrapes.
    let mut config = test_config();
    config.metrics_exposure = MetricsExposure::Bearer(b"scrape-token".to_vec());
    let (state, _db) = make_state(config);
    let app = build_app!(state);

    let req = test::TestRequest::get()
        .uri("/metrics")
        .insert_header(("Authorization", "Bearer wrong"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    let req = test::TestRequest::get()
        .uri("/metrics")
        .insert_header(("Authorization", "Bearer scrape-token"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_rt::test]
async fn verify_payment_without_service_requires_amount() {
    let (state, _db) = make_state(test_config());
    let app = build_app!(state);

    let tuple = unsigned_tuple(ESCROW, PRICE);
    let header = encode_tunnel(&tuple, None).unwrap();
    let req = test::TestRequest::post()
        .uri("/verify-payment")
        .set_json(serde_json::json!({ "payment_signature": header }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_rt::test]
async fn revenue_wallet_requires_valid_address() {
    let (state, _db) = make_state(test_config());
    let app = build_app!(state);

    let req = test::TestRequest::get()
        .uri("/revenue/wallet?address=not-an-address")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_rt::test]
async fn claim_requires_wallet_and_positive_amount() {
    let (state, _db) = make_state(test_config());
    let app = build_app!(state);

    let req = test::TestRequest::post()
        .uri("/claim")
        .set_json(serde_json::json!({ "amount": "0.95" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::post()
        .uri("/claim")
        .set_json(serde_json::json!({
            "wallet_address": "0x3333333333333333333333333333333333333333",
            "amount": "0",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_rt::test]
async fn plugin_manifest_is_stateless_and_counts_services() {
    let (state, db) = make_state(test_config());
    let app = build_app!(state);

    let req = test::TestRequest::get()
        .uri("/.well-known/ai-plugin.json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["schema_version"], "v1");
    assert_eq!(body["service_count"], 0);

    db.create_service(&hosted_service("svc-1")).unwrap();

    let req = test::TestRequest::get()
        .uri("/.well-known/ai-plugin.json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["service_count"], 1);
}

#[actix_rt::test]
async fn catalog_search_and_tag_filtering() {
    let (state, db) = make_state(test_config());
    let mut weather = hosted_service("weather-api");
    weather.name = "Weather Data".to_string();
    weather.tags = Some("weather".to_string());
    db.create_service(&weather).unwrap();
    db.create_service(&hosted_service("gold-price")).unwrap();
    let app = build_app!(state);

    let req = test::TestRequest::get()
        .uri("/services?search=Weather")
        .to_request();
    let resp = test::call_service(&app, req).await;
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["count"], 1);

    let req = test::TestRequest::get().uri("/services?tag=weather").to_request();
    let resp = test::call_service(&app, req).await;
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["services"][0]["id"], "weather-api");
}
