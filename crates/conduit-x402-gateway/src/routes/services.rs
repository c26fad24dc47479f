use actix_web::{web, HttpResponse};
use alloy::primitives::{Address, U256};

use conduit_x402::contracts::service_id_hash;

use crate::challenge::service_requirements;
use crate::db::{Service, ServiceKind};
use crate::error::GatewayError;
use crate::state::AppState;
use crate::validation::{validate_service_id, vet_upstream_url};

/// Catalog entry as exposed on the free listing. HOSTED content stays out:
/// that is the paid product.
fn catalog_entry(service: &Service, state: &AppState) -> serde_json::Value {
    serde_json::json!({
        "id": service.id,
        "name": service.name,
        "description": service.description,
        "price": service.price,
        "kind": service.kind,
        "endpoint": service.endpoint,
        "provider": service.provider_address,
        "tags": service.tags,
        "active": service.active,
        "createdAt": service.created_at,
        "paymentRequirements": service_requirements(service, &state.chain),
    })
}

#[derive(Debug, serde::Deserialize)]
pub struct CatalogQuery {
    pub search: Option<String>,
    pub tag: Option<String>,
}

/// GET /services - free catalog listing
pub async fn list_services(
    query: web::Query<CatalogQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let services = state
        .db
        .list_services(query.search.as_deref(), query.tag.as_deref())?;
    let entries: Vec<_> = services
        .iter()
        .map(|s| catalog_entry(s, &state))
        .collect();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "services": entries,
        "count": entries.len(),
    })))
}

/// GET /services/{id}
pub async fn get_service(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let id = path.into_inner();
    let service = state
        .db
        .get_service(&id)?
        .ok_or_else(|| GatewayError::ServiceNotFound(id.clone()))?;
    Ok(HttpResponse::Ok().json(catalog_entry(&service, &state)))
}

#[derive(Debug, serde::Deserialize)]
pub struct CreateService {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Price in token base units, decimal string.
    pub price: String,
    pub kind: ServiceKind,
    pub content: Option<String>,
    pub endpoint: Option<String>,
    pub provider_address: String,
    pub tags: Option<String>,
}

/// POST /services - create a service, DB first, then the on-chain registry.
/// If on-chain registration fails, the DB row is rolled back so the catalog
/// never advertises a service the processor would refuse.
pub async fn create_service(
    body: web::Json<CreateService>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let body = body.into_inner();
    validate_service_id(&body.id)?;

    let price: U256 = body
        .price
        .parse()
        .map_err(|_| GatewayError::InvalidRequest("price must be a base-unit integer".into()))?;
    if price.is_zero() {
        return Err(GatewayError::InvalidRequest("price must be > 0".into()));
    }

    let provider_wallet: Address = body.provider_address.parse().map_err(|_| {
        GatewayError::InvalidRequest("provider_address is not a valid address".into())
    })?;

    // Kind-specific fields are exclusive.
    let (content, endpoint) = match body.kind {
        ServiceKind::Hosted => {
            let content = body
                .content
                .filter(|c| !c.is_empty())
                .ok_or_else(|| GatewayError::InvalidRequest("hosted services need content".into()))?;
            if body.endpoint.is_some() {
                return Err(GatewayError::InvalidRequest(
                    "hosted services must not set an endpoint".into(),
                ));
            }
            // Self-reference: the gateway is the endpoint for hosted content.
            (Some(content), Some(state.config.gateway_endpoint(&body.id)))
        }
        ServiceKind::Proxy => {
            let endpoint = body
                .endpoint
                .filter(|e| !e.is_empty())
                .ok_or_else(|| GatewayError::InvalidRequest("proxy services need an endpoint".into()))?;
            vet_upstream_url(&endpoint, &state.config.base_url)?;
            if body.content.is_some() {
                return Err(GatewayError::InvalidRequest(
                    "proxy services must not set content".into(),
                ));
            }
            (None, Some(endpoint))
        }
        ServiceKind::Native => {
            if body.content.is_some() || body.endpoint.is_some() {
                return Err(GatewayError::InvalidRequest(
                    "native services carry neither content nor endpoint".into(),
                ));
            }
            (None, None)
        }
    };

    let provider_hex = format!("{provider_wallet:#x}");
    state.db.ensure_provider(&provider_hex, None)?;

    let service = Service {
        id: body.id.clone(),
        name: body.name,
        description: body.description,
        price: body.price,
        kind: body.kind,
        content,
        endpoint,
        provider_address: provider_hex,
        tags: body.tags,
        active: true,
        created_at: chrono::Utc::now().timestamp(),
    };
    state.db.create_service(&service)?;

    // On-chain registration. The registry endpoint is the gateway path for
    // HOSTED/PROXY; native services register their own.
    let chain_endpoint = service
        .endpoint
        .clone()
        .unwrap_or_else(|| state.config.gateway_endpoint(&service.id));
    let registered = state
        .engine
        .register_service(
            service_id_hash(&service.id),
            provider_wallet,
            price,
            &service.name,
            &chain_endpoint,
        )
        .await;

    let tx_hash = match registered {
        Ok(hash) => hash,
        Err(e) => {
            tracing::error!(service = %service.id, "on-chain registration failed, rolling back: {e}");
            state.db.delete_service_row(&service.id)?;
            return Err(e.into());
        }
    };

    tracing::info!(service = %service.id, tx = %tx_hash, "service registered");
    Ok(HttpResponse::Created().json(serde_json::json!({
        "service": catalog_entry(&service, &state),
        "txHash": format!("{tx_hash:#x}"),
    })))
}

#[derive(Debug, serde::Deserialize)]
pub struct UpdateService {
    pub price: Option<String>,
    pub description: Option<String>,
    pub active: Option<bool>,
}

/// PATCH /services/{id} - chain first, mirror second: a divergent mirror
/// under-charges nobody, but a divergent registry reverts settlements.
pub async fn update_service(
    path: web::Path<String>,
    body: web::Json<UpdateService>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let id = path.into_inner();
    let body = body.into_inner();

    state
        .db
        .get_service(&id)?
        .ok_or_else(|| GatewayError::ServiceNotFound(id.clone()))?;

    if let Some(ref raw) = body.price {
        let price: U256 = raw
            .parse()
            .map_err(|_| GatewayError::InvalidRequest("price must be a base-unit integer".into()))?;
        if price.is_zero() {
            return Err(GatewayError::InvalidRequest("price must be > 0".into()));
        }
        state.engine.update_price(service_id_hash(&id), price).await?;
    }
    if let Some(active) = body.active {
        state.engine.set_active(service_id_hash(&id), active).await?;
    }

    let updated = state.db.update_service(
        &id,
        body.price.as_deref(),
        body.description.as_deref(),
        body.active,
    )?;

    Ok(HttpResponse::Ok().json(catalog_entry(&updated, &state)))
}

/// DELETE /services/{id} - deactivate on-chain and in the mirror
pub async fn deactivate_service(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let id = path.into_inner();
    state
        .db
        .get_service(&id)?
        .ok_or_else(|| GatewayError::ServiceNotFound(id.clone()))?;

    state.engine.set_active(service_id_hash(&id), false).await?;
    state.db.update_service(&id, None, None, Some(false))?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": format!("service '{}' deactivated", id),
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/services")
            .route(web::get().to(list_services))
            .route(web::post().to(create_service)),
    )
    .service(
        web::resource("/services/{id}")
            .route(web::get().to(get_service))
            .route(web::patch().to(update_service))
            .route(web::delete().to(deactivate_service)),
    );
}
