use actix_web::{web, HttpResponse};
use alloy::primitives::Address;

use conduit_x402::payment::SignatureTuple;
use conduit_x402::ChainConfig;

use crate::challenge::service_requirements;
use crate::db::ServiceKind;
use crate::error::GatewayError;
use crate::pipeline;
use crate::proxy;
use crate::state::AppState;

/// EIP-712 signing material an autonomous agent needs to produce a valid
/// authorization without fetching the token contract first.
fn signing_info(chain: &ChainConfig) -> serde_json::Value {
    serde_json::json!({
        "domain": {
            "name": chain.token_name,
            "version": chain.eip712_domain_version,
            "chainId": chain.chain_id,
            "verifyingContract": chain.token_address,
        },
        "primaryType": "ReceiveWithAuthorization",
        "types": {
            "ReceiveWithAuthorization": [
                { "name": "from", "type": "address" },
                { "name": "to", "type": "address" },
                { "name": "value", "type": "uint256" },
                { "name": "validAfter", "type": "uint256" },
                { "name": "validBefore", "type": "uint256" },
                { "name": "nonce", "type": "bytes32" },
            ],
        },
        "executeEndpoint": "/agent/execute",
    })
}

fn agent_entry(service: &crate::db::Service, state: &AppState) -> serde_json::Value {
    serde_json::json!({
        "id": service.id,
        "title": service.name,
        "description": service.description,
        "kind": service.kind,
        "endpoint": service.endpoint,
        "paymentRequirements": service_requirements(service, &state.chain),
        "signingInfo": signing_info(&state.chain),
    })
}

/// GET /agent/services - the agent-shaped catalog
pub async fn list_services(
    query: web::Query<super::services::CatalogQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let services = state
        .db
        .list_services(query.search.as_deref(), query.tag.as_deref())?;
    let entries: Vec<_> = services.iter().map(|s| agent_entry(s, &state)).collect();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "services": entries,
        "count": entries.len(),
    })))
}

/// GET /agent/services/{id}
pub async fn get_service(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let id = path.into_inner();
    let service = state
        .db
        .get_service(&id)?
        .ok_or_else(|| GatewayError::ServiceNotFound(id.clone()))?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "service": agent_entry(&service, &state),
    })))
}

#[derive(Debug, serde::Deserialize)]
pub struct AgentExecuteRequest {
    #[serde(alias = "serviceId")]
    pub service_id: String,
    #[serde(alias = "walletAddress")]
    pub wallet_address: Address,
    pub signature: SignatureTuple,
    #[serde(default, alias = "requestBody")]
    pub request_body: Option<serde_json::Value>,
}

/// POST /agent/execute - single-shot settle + invoke for agent clients
pub async fn execute(
    body: web::Json<AgentExecuteRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let body = body.into_inner();

    let service = state
        .db
        .get_service(&body.service_id)?
        .ok_or_else(|| GatewayError::ServiceNotFound(body.service_id.clone()))?;
    if !service.active {
        return Err(GatewayError::ServiceGone(body.service_id));
    }
    if service.kind == ServiceKind::Native {
        return Err(GatewayError::InvalidRequest(
            "native services are invoked at their own endpoint".into(),
        ));
    }
    if body.wallet_address != body.signature.from {
        return Err(GatewayError::InvalidRequest(
            "wallet_address does not match the authorization signer".into(),
        ));
    }

    let paid = pipeline::verify_and_settle(&state, &service, &body.signature).await?;
    let tx_hash = paid.settlement.tx_hash;

    let payment = serde_json::json!({
        "txHash": format!("{tx_hash:#x}"),
        "payer": format!("{:#x}", paid.settlement.payer),
        "amount": paid.settlement.amount.to_string(),
        "receiver": format!("{:#x}", state.chain.escrow_address),
    });

    if paid.is_pending() {
        return Ok(HttpResponse::Accepted().json(serde_json::json!({
            "status": "pending",
            "error": "TIMED_OUT",
            "message": "confirmation wait exceeded; the transaction may still mine",
            "payment": payment,
        })));
    }

    let response = match service.kind {
        ServiceKind::Hosted => {
            proxy::hosted_content(service.content.as_deref().unwrap_or("null"))
        }
        ServiceKind::Proxy => {
            let endpoint = service.endpoint.as_deref().ok_or_else(|| {
                GatewayError::Internal(format!("proxy service '{}' has no endpoint", service.id))
            })?;
            let upstream_body = body
                .request_body
                .as_ref()
                .map(|v| bytes::Bytes::from(v.to_string()))
                .unwrap_or_default();
            match proxy::forward_upstream(
                &state.http_client,
                &actix_web::http::Method::POST,
                endpoint,
                upstream_body,
                paid.settlement.payer,
                tx_hash,
            )
            .await
            {
                Ok(value) => value,
                Err(message) => serde_json::json!({
                    "error": "UPSTREAM_FAILED",
                    "message": message,
                }),
            }
        }
        ServiceKind::Native => unreachable!("rejected above"),
    };

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "payment": payment,
        "service": {
            "id": service.id,
            "name": service.name,
            "endpoint": service.endpoint,
        },
        "response": response,
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/agent/services").route(web::get().to(list_services)))
        .service(web::resource("/agent/services/{id}").route(web::get().to(get_service)))
        .service(web::resource("/agent/execute").route(web::post().to(execute)));
}
