use actix_web::{web, HttpRequest, HttpResponse};

use crate::metrics::REGISTRY;
use crate::state::AppState;

/// GET /health - liveness plus an RPC reachability probe. Always 200: a
/// degraded chain link is reported, not fatal to the process.
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let (rpc, block) = match state.engine.health_check().await {
        Ok(block) => ("ok", Some(block.to_string())),
        Err(_) => ("unreachable", None),
    };
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "conduit-x402-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "rpc": rpc,
        "latestBlock": block,
    }))
}

/// GET /metrics - Prometheus text format, exposure-guarded
pub async fn metrics(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    use prometheus::Encoder;

    let authorization = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());
    if let Err((status, message)) = state.config.metrics_exposure.permit(authorization) {
        let mut builder = if status == 401 {
            HttpResponse::Unauthorized()
        } else {
            HttpResponse::Forbidden()
        };
        return builder.json(serde_json::json!({ "error": message }));
    }

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("failed to encode metrics: {}", e);
        return HttpResponse::InternalServerError().body("failed to encode metrics");
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(String::from_utf8(buffer).unwrap_or_default())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics));
}
