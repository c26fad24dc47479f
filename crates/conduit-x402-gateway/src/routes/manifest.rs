use actix_web::{web, HttpResponse};

use crate::error::GatewayError;
use crate::state::AppState;

/// GET /.well-known/ai-plugin.json - the agent-facing plugin manifest.
/// Stateless, recomputed per request from the live catalog.
pub async fn ai_plugin(state: web::Data<AppState>) -> Result<HttpResponse, GatewayError> {
    let services = state.db.list_services(None, None)?;
    let base = state.config.base_url.trim_end_matches('/');

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "schema_version": "v1",
        "name_for_human": "Conduit x402 Gateway",
        "name_for_model": "conduit_x402_gateway",
        "description_for_human":
            "Pay-per-call access to hosted data and proxied APIs via x402 micropayments.",
        "description_for_model":
            "Catalog of paid services. List with /agent/services, read signingInfo for the \
             EIP-712 domain and types, sign a ReceiveWithAuthorization payload, then invoke \
             POST /agent/execute with {service_id, wallet_address, signature, request_body}.",
        "auth": { "type": "none" },
        "api": {
            "type": "x402",
            "catalog_url": format!("{base}/agent/services"),
            "execute_url": format!("{base}/agent/execute"),
            "network": state.chain.network,
            "scheme": state.chain.scheme_name,
        },
        "service_count": services.len(),
        "contact_email": "ops@conduit.example",
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/.well-known/ai-plugin.json").route(web::get().to(ai_plugin)));
}
