use actix_web::{web, HttpRequest, HttpResponse};
use alloy::primitives::U256;

use conduit_x402::codec::decode_payment_header;
use conduit_x402::contracts::split_fee;
use conduit_x402::relayer::SettlementStatus;
use conduit_x402::verify::Expected;

use crate::error::GatewayError;
use crate::metrics;
use crate::pipeline;
use crate::state::AppState;

#[derive(Debug, serde::Deserialize)]
pub struct VerifyPaymentRequest {
    /// base64 tunnel envelope (same encoding as the payment-signature header).
    pub payment_signature: String,
    #[serde(default)]
    pub service_id: Option<String>,
    /// Wallet address to credit in the mirror on the legacy path.
    #[serde(default)]
    pub provider_id: Option<String>,
    /// Required amount in base units; mandatory when no service is bound.
    #[serde(default)]
    pub amount: Option<String>,
}

/// Authenticate the caller against the delegation key, when one is
/// configured. Runs over the raw body before any parsing.
fn validate_delegation_auth(
    req: &HttpRequest,
    body: &[u8],
    state: &AppState,
) -> Result<(), GatewayError> {
    let Some(ref key) = state.config.delegation_key else {
        return Ok(());
    };
    let header = req
        .headers()
        .get("X-Delegation-Auth")
        .and_then(|v| v.to_str().ok());
    match header {
        Some(mac) if key.authenticate(body, mac) => Ok(()),
        Some(_) => {
            tracing::warn!("delegation MAC mismatch");
            Err(GatewayError::Unauthorized("authentication failed".into()))
        }
        None => {
            tracing::warn!("delegation header missing");
            Err(GatewayError::Unauthorized("authentication required".into()))
        }
    }
}

/// POST /verify-payment - verify+settle offloaded by an external service.
///
/// With a `service_id` this is the full processor path. Without one there is
/// no registry binding, so the engine falls back to the direct-token transfer:
/// funds land in the escrow but no provider balance is credited on-chain. The
/// mirror is still updated when `provider_id` is given. Documented
/// best-effort, the mirror drifts from chain on this path.
pub async fn verify_payment(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    validate_delegation_auth(&req, &body, &state)?;

    let parsed: VerifyPaymentRequest = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::InvalidRequest(format!("invalid request body: {e}")))?;

    let decoded =
        decode_payment_header(&parsed.payment_signature).map_err(GatewayError::Payment)?;

    match parsed.service_id {
        Some(ref service_id) => {
            let service = state
                .db
                .get_service(service_id)?
                .ok_or_else(|| GatewayError::ServiceNotFound(service_id.clone()))?;
            if !service.active {
                return Err(GatewayError::ServiceGone(service_id.clone()));
            }

            let paid = pipeline::verify_and_settle(&state, &service, &decoded.signature).await?;
            Ok(settle_reply(&paid, paid.settlement.status))
        }
        None => {
            let amount_raw = parsed.amount.as_deref().ok_or_else(|| {
                GatewayError::InvalidRequest(
                    "amount is required when no service_id is given".into(),
                )
            })?;
            let amount: U256 = amount_raw.parse().map_err(|_| {
                GatewayError::InvalidRequest("amount must be a base-unit integer".into())
            })?;
            if amount.is_zero() {
                return Err(GatewayError::InvalidRequest("amount must be > 0".into()));
            }

            let expected = Expected {
                escrow: state.chain.escrow_address,
                price: amount,
            };
            state
                .engine
                .verify_authorization(&decoded.signature, &expected)
                .await
                .map_err(GatewayError::Payment)?;

            metrics::LEGACY_DIRECT_SETTLEMENTS.inc();
            let start = std::time::Instant::now();
            let settlement = match state.engine.settle_direct(&decoded.signature).await {
                Ok(s) => s,
                Err(e) => {
                    metrics::SETTLEMENTS_TOTAL
                        .with_label_values(&["direct", "failed"])
                        .inc();
                    return Err(e.into());
                }
            };
            metrics::SETTLEMENTS_TOTAL
                .with_label_values(&["direct", "success"])
                .inc();
            metrics::SETTLE_LATENCY
                .with_label_values(&["success"])
                .observe(start.elapsed().as_secs_f64());

            let (fee, share) = split_fee(settlement.amount, state.config.platform_fee_bps);

            // Best-effort mirror credit: nothing on-chain backs this entry.
            if settlement.status != SettlementStatus::TimedOut {
                if let Some(ref provider_id) = parsed.provider_id {
                    state.db.record_settlement(
                        None,
                        &format!("{:#x}", settlement.payer),
                        provider_id,
                        &settlement.amount.to_string(),
                        &share.to_string(),
                        &format!("{:#x}", settlement.tx_hash),
                    )?;
                }
            }

            let paid = pipeline::SettledPayment {
                settlement,
                platform_fee: fee,
                provider_share: share,
            };
            Ok(settle_reply(&paid, settlement.status))
        }
    }
}

fn settle_reply(paid: &pipeline::SettledPayment, status: SettlementStatus) -> HttpResponse {
    let body = serde_json::json!({
        "valid": true,
        "tx_hash": format!("{:#x}", paid.settlement.tx_hash),
        "payer": format!("{:#x}", paid.settlement.payer),
        "platform_fee": paid.platform_fee.to_string(),
        "provider_revenue": paid.provider_share.to_string(),
    });
    match status {
        SettlementStatus::TimedOut => {
            let mut body = body;
            body["status"] = serde_json::Value::String("pending".into());
            HttpResponse::Accepted().json(body)
        }
        _ => HttpResponse::Ok().json(body),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/verify-payment").route(web::post().to(verify_payment)));
}
