use actix_web::{HttpRequest, HttpResponse};

use conduit_x402::codec::{decode_payment_header, DecodedPayment};
use conduit_x402::payment::{PaymentRequiredBody, PaymentRequirements, TokenExtra};
use conduit_x402::{ChainConfig, X402Error, CHALLENGE_TIMEOUT_SECS};

use crate::db::Service;
use crate::metrics;

/// Build the 402 requirements block for a service.
///
/// `pay_to` is the escrow contract: not the provider wallet and not the
/// relayer. Either of those would make `processPayment` revert at settlement.
pub fn service_requirements(service: &Service, chain: &ChainConfig) -> PaymentRequirements {
    PaymentRequirements {
        scheme: chain.scheme_name.clone(),
        network: chain.network.clone(),
        max_amount_required: service.price.clone(),
        resource: format!("/gateway/{}", service.id),
        description: service.name.clone(),
        pay_to: chain.escrow_address,
        max_timeout_seconds: CHALLENGE_TIMEOUT_SECS,
        asset: chain.token_address,
        extra: TokenExtra {
            symbol: chain.token_symbol.clone(),
            decimals: chain.token_decimals,
            token_name: chain.token_name.clone(),
        },
    }
}

/// The stateless 402 challenge. The signature the consumer answers with
/// carries all replay-relevant state; nothing is stored per challenge.
pub fn payment_required_response(requirements: PaymentRequirements) -> HttpResponse {
    metrics::CHALLENGES_ISSUED.inc();
    HttpResponse::PaymentRequired()
        .content_type("application/json")
        .json(PaymentRequiredBody::new(requirements))
}

/// Pull the raw `payment-signature` header off a request.
pub fn extract_payment_header(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("payment-signature")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Decode the payment header and validate the echoed requirements block
/// against the issued one, when present.
pub fn decode_and_check_echo(
    header: &str,
    issued: &PaymentRequirements,
) -> Result<DecodedPayment, X402Error> {
    let decoded = decode_payment_header(header)?;
    if let Some(ref accepted) = decoded.accepted {
        conduit_x402::codec::requirements_echo_matches(accepted, issued)?;
    }
    Ok(decoded)
}
