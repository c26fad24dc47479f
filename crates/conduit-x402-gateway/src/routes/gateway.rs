use actix_web::{web, HttpRequest, HttpResponse};
use bytes::Bytes;

use crate::challenge::{decode_and_check_echo, extract_payment_header, payment_required_response, service_requirements};
use crate::db::{Service, ServiceKind};
use crate::error::GatewayError;
use crate::pipeline;
use crate::proxy;
use crate::state::AppState;

/// GET|POST /gateway/{service_id} - the protected entry point.
///
/// No payment header: 402 challenge. With one: decode → verify → settle →
/// fulfill. The gateway mediates HOSTED and PROXY services only.
pub async fn gateway_entry(
    req: HttpRequest,
    path: web::Path<String>,
    body: Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let id = path.into_inner();

    let service = state
        .db
        .get_service(&id)?
        .ok_or_else(|| GatewayError::ServiceNotFound(id.clone()))?;
    if !service.active {
        return Err(GatewayError::ServiceGone(id));
    }
    if service.kind == ServiceKind::Native {
        return Ok(HttpResponse::BadRequest().json(serde_json::json!({
            "error": "SERVICE_NOT_MEDIATED",
            "message": "native services are served by the provider; call the service's own endpoint",
            "service": id,
        })));
    }

    let requirements = service_requirements(&service, &state.chain);

    let header = match extract_payment_header(&req) {
        Some(h) => h,
        None => return Ok(payment_required_response(requirements)),
    };

    let decoded = decode_and_check_echo(&header, &requirements).map_err(GatewayError::Payment)?;
    let paid = pipeline::verify_and_settle(&state, &service, &decoded.signature).await?;

    if paid.is_pending() {
        return Ok(pending_response(&paid));
    }

    fulfill(&req, &state, &service, body, &paid).await
}

/// 202: broadcast but unmined within the confirmation window. The ledger
/// reconciler picks it up if it lands later.
fn pending_response(paid: &pipeline::SettledPayment) -> HttpResponse {
    HttpResponse::Accepted().json(serde_json::json!({
        "status": "pending",
        "error": "TIMED_OUT",
        "message": "confirmation wait exceeded; the transaction may still mine",
        "txHash": format!("{:#x}", paid.settlement.tx_hash),
    }))
}

/// Deliver the paid-for result: stored content for HOSTED, an upstream call
/// for PROXY. An upstream failure still returns 200; the caller holds the
/// settlement hash as evidence of paid-but-undelivered.
async fn fulfill(
    req: &HttpRequest,
    state: &AppState,
    service: &Service,
    body: Bytes,
    paid: &pipeline::SettledPayment,
) -> Result<HttpResponse, GatewayError> {
    let tx_hash = paid.settlement.tx_hash;
    match service.kind {
        ServiceKind::Hosted => {
            let content = proxy::hosted_content(service.content.as_deref().unwrap_or("null"));
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "content": content,
                "txHash": format!("{tx_hash:#x}"),
            })))
        }
        ServiceKind::Proxy => {
            let endpoint = service.endpoint.as_deref().ok_or_else(|| {
                GatewayError::Internal(format!("proxy service '{}' has no endpoint", service.id))
            })?;
            match proxy::forward_upstream(
                &state.http_client,
                req.method(),
                endpoint,
                body,
                paid.settlement.payer,
                tx_hash,
            )
            .await
            {
                Ok(upstream) => Ok(HttpResponse::Ok().json(proxy::merge_tx_hash(upstream, tx_hash))),
                Err(message) => Ok(HttpResponse::Ok().json(serde_json::json!({
                    "response": {
                        "error": "UPSTREAM_FAILED",
                        "message": message,
                    },
                    "payment": {
                        "txHash": format!("{tx_hash:#x}"),
                        "payer": format!("{:#x}", paid.settlement.payer),
                    },
                }))),
            }
        }
        ServiceKind::Native => unreachable!("native services are rejected before settlement"),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/gateway/{service_id}")
            .route(web::get().to(gateway_entry))
            .route(web::post().to(gateway_entry)),
    );
}
