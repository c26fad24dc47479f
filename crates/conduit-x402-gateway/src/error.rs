use actix_web::{HttpResponse, ResponseError};
use std::fmt;

use conduit_x402::X402Error;

#[derive(Debug)]
pub enum GatewayError {
    /// Payment pipeline error carrying the x402 taxonomy kind.
    Payment(X402Error),
    /// Service not present in the catalog.
    ServiceNotFound(String),
    /// Service exists but was deactivated.
    ServiceGone(String),
    /// Service id already registered.
    ServiceExists(String),
    /// Client sent something structurally unusable.
    InvalidRequest(String),
    /// Missing or invalid delegation credentials.
    Unauthorized(String),
    /// Database error
    Database(rusqlite::Error),
    /// Internal error
    Internal(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Payment(e) => write!(f, "payment error: {}", e),
            GatewayError::ServiceNotFound(id) => write!(f, "service not found: {}", id),
            GatewayError::ServiceGone(id) => write!(f, "service deactivated: {}", id),
            GatewayError::ServiceExists(id) => write!(f, "service already exists: {}", id),
            GatewayError::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
            GatewayError::Unauthorized(msg) => write!(f, "unauthorized: {}", msg),
            GatewayError::Database(e) => write!(f, "database error: {}", e),
            GatewayError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<rusqlite::Error> for GatewayError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref err, _) = e {
            // SQLITE_CONSTRAINT_UNIQUE / _PRIMARYKEY
            if err.extended_code == 2067 || err.extended_code == 1555 {
                return GatewayError::ServiceExists("id already registered".to_string());
            }
        }
        GatewayError::Database(e)
    }
}

impl From<X402Error> for GatewayError {
    fn from(e: X402Error) -> Self {
        GatewayError::Payment(e)
    }
}

fn error_body(kind: &str, message: &str) -> serde_json::Value {
    serde_json::json!({ "error": kind, "message": message })
}

impl ResponseError for GatewayError {
    fn error_response(&self) -> HttpResponse {
        match self {
            GatewayError::Payment(e) => payment_error_response(e),
            GatewayError::ServiceNotFound(id) => HttpResponse::NotFound().json(error_body(
                "SERVICE_INACTIVE",
                &format!("service '{}' is not registered", id),
            )),
            GatewayError::ServiceGone(id) => HttpResponse::Gone().json(error_body(
                "SERVICE_INACTIVE",
                &format!("service '{}' has been deactivated", id),
            )),
            GatewayError::ServiceExists(id) => HttpResponse::Conflict().json(error_body(
                "SERVICE_EXISTS",
                &format!("service '{}' is already registered", id),
            )),
            GatewayError::InvalidRequest(msg) => {
                HttpResponse::BadRequest().json(error_body("INVALID_REQUEST", msg))
            }
            GatewayError::Unauthorized(msg) => {
                HttpResponse::Unauthorized().json(error_body("UNAUTHORIZED", msg))
            }
            GatewayError::Database(e) => {
                tracing::error!("database error: {}", e);
                HttpResponse::InternalServerError()
                    .json(error_body("INTERNAL_ERROR", "an internal error occurred"))
            }
            GatewayError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                HttpResponse::InternalServerError()
                    .json(error_body("INTERNAL_ERROR", "an internal error occurred"))
            }
        }
    }
}

/// Map an x402 error onto its HTTP surface.
///
/// Client-correctable verification failures are 4xx; a fresh signature fixes
/// them. Settlement and chain failures are 5xx and need an operator.
fn payment_error_response(e: &X402Error) -> HttpResponse {
    let body = error_body(e.kind(), &e.to_string());
    match e {
        X402Error::MissingPayment => HttpResponse::PaymentRequired().json(body),
        X402Error::InvalidPayload(_)
        | X402Error::BadRequirementsEcho(_)
        | X402Error::BadDestination(_)
        | X402Error::InsufficientValue(_)
        | X402Error::SerdeError(_) => HttpResponse::BadRequest().json(body),
        X402Error::OutOfWindow(_) | X402Error::NonceUsed | X402Error::BadSignature(_) => {
            HttpResponse::PaymentRequired().json(body)
        }
        X402Error::ServiceInactive(_) => HttpResponse::Gone().json(body),
        X402Error::RateLimited(_) => HttpResponse::TooManyRequests().json(body),
        X402Error::TimedOut(_) => HttpResponse::Accepted().json(body),
        X402Error::UpstreamFailed(_) => HttpResponse::BadGateway().json(body),
        X402Error::SettlementFailed(_) | X402Error::ChainError(_) | X402Error::ConfigError(_) => {
            tracing::error!(kind = e.kind(), "settlement-class failure: {}", e);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_errors_are_client_errors() {
        let resp = GatewayError::Payment(X402Error::BadDestination("x".into())).error_response();
        assert_eq!(resp.status(), 400);

        let resp = GatewayError::Payment(X402Error::NonceUsed).error_response();
        assert_eq!(resp.status(), 402);

        let resp = GatewayError::Payment(X402Error::OutOfWindow("x".into())).error_response();
        assert_eq!(resp.status(), 402);
    }

    #[test]
    fn settlement_errors_are_server_errors() {
        let resp =
            GatewayError::Payment(X402Error::SettlementFailed("revert".into())).error_response();
        assert_eq!(resp.status(), 500);
    }

    #[test]
    fn timed_out_is_accepted_warning() {
        let resp = GatewayError::Payment(X402Error::TimedOut("x".into())).error_response();
        assert_eq!(resp.status(), 202);
    }

    #[test]
    fn rate_limited_is_429() {
        let resp = GatewayError::Payment(X402Error::RateLimited("x".into())).error_response();
        assert_eq!(resp.status(), 429);
    }
}
