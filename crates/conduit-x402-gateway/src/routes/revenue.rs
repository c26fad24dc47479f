use actix_web::{web, HttpResponse};
use alloy::primitives::Address;

use conduit_x402::payment::{format_base_units, parse_decimal_units};

use crate::error::GatewayError;
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, serde::Deserialize)]
pub struct WalletQuery {
    pub address: String,
}

/// GET /revenue/wallet?address=W - claimable balance straight from the
/// escrow contract. The mirror is never consulted here: the UI must show
/// on-chain truth regardless of drift.
pub async fn revenue_wallet(
    query: web::Query<WalletQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let wallet: Address = query
        .address
        .parse()
        .map_err(|_| GatewayError::InvalidRequest("address is not a valid address".into()))?;

    let raw = state
        .engine
        .provider_claimable(wallet)
        .await
        .map_err(GatewayError::Payment)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "claimable_balance": format_base_units(raw, state.chain.token_decimals),
        "raw_balance": raw.to_string(),
        "source": "on-chain",
    })))
}

/// GET /revenue/{provider_id} - the DB mirror plus the on-chain override
pub async fn revenue_provider(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let provider_id = path.into_inner();
    let wallet: Address = provider_id
        .parse()
        .map_err(|_| GatewayError::InvalidRequest("provider id must be a wallet address".into()))?;

    let mirror = state.db.get_provider(&format!("{wallet:#x}"))?;
    let raw = state
        .engine
        .provider_claimable(wallet)
        .await
        .map_err(GatewayError::Payment)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "provider": mirror,
        "claimable_balance": format_base_units(raw, state.chain.token_decimals),
        "raw_balance": raw.to_string(),
        "source": "on-chain",
    })))
}

#[derive(Debug, serde::Deserialize)]
pub struct ClaimRequest {
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    /// Human decimal amount (e.g. "0.95") or base-unit integer string.
    pub amount: serde_json::Value,
}

/// POST /claim - the relayer triggers `escrow.withdraw(wallet, amount)` on
/// the provider's behalf; the provider spends no gas.
pub async fn claim(
    body: web::Json<ClaimRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let body = body.into_inner();

    let wallet_raw = body
        .wallet_address
        .or(body.provider_id)
        .ok_or_else(|| GatewayError::InvalidRequest("wallet_address or provider_id required".into()))?;
    let wallet: Address = wallet_raw
        .parse()
        .map_err(|_| GatewayError::InvalidRequest("wallet is not a valid address".into()))?;

    let amount_str = match &body.amount {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => {
            return Err(GatewayError::InvalidRequest(
                "amount must be a string or number".into(),
            ))
        }
    };
    let amount = parse_decimal_units(&amount_str, state.chain.token_decimals)
        .map_err(GatewayError::Payment)?;
    if amount.is_zero() {
        return Err(GatewayError::InvalidRequest("amount must be > 0".into()));
    }

    let tx_hash = match state.engine.withdraw(wallet, amount).await {
        Ok(hash) => hash,
        Err(e) => {
            metrics::CLAIMS_TOTAL.with_label_values(&["failed"]).inc();
            tracing::error!(wallet = %wallet, "withdraw failed: {e}");
            return Err(e.into());
        }
    };
    metrics::CLAIMS_TOTAL.with_label_values(&["success"]).inc();

    state
        .db
        .record_claim(&format!("{wallet:#x}"), &amount.to_string(), &format!("{tx_hash:#x}"))?;

    tracing::info!(wallet = %wallet, amount = %amount, tx = %tx_hash, "claim settled");
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "tx_hash": format!("{tx_hash:#x}"),
        "amount": amount.to_string(),
        "wallet": format!("{wallet:#x}"),
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/revenue/wallet").route(web::get().to(revenue_wallet)))
        .service(web::resource("/revenue/{provider_id}").route(web::get().to(revenue_provider)))
        .service(web::resource("/claim").route(web::post().to(claim)));
}
