//! The shared verify → settle → record pipeline behind every paid surface.
//!
//! Routes differ in how the signature arrives and what they do after payment;
//! everything between (ordered verification, processor settlement, fee
//! split, ledger write, metrics) is identical and lives here.

use std::time::Duration;

use alloy::primitives::U256;

use conduit_x402::contracts::{service_id_hash, split_fee};
use conduit_x402::payment::SignatureTuple;
use conduit_x402::relayer::{Settlement, SettlementStatus};
use conduit_x402::verify::Expected;

use crate::db::Service;
use crate::error::GatewayError;
use crate::metrics;
use crate::state::AppState;

/// A settlement that made it on-chain, with its fee split.
#[derive(Debug, Clone, Copy)]
pub struct SettledPayment {
    pub settlement: Settlement,
    pub platform_fee: U256,
    pub provider_share: U256,
}

impl SettledPayment {
    pub fn is_pending(&self) -> bool {
        self.settlement.status == SettlementStatus::TimedOut
    }
}

/// Parse a service's stored base-unit price.
pub fn service_price(service: &Service) -> Result<U256, GatewayError> {
    service
        .price
        .parse::<U256>()
        .map_err(|_| GatewayError::Internal(format!("service '{}' has a bad price", service.id)))
}

/// Run the full pipeline for one authorization against one service.
///
/// On CONFIRMED (or SUBMITTED under the optimistic policy) the access log row
/// and provider mirror are written before this returns. On a confirmation
/// timeout nothing is recorded yet; a background reconciler writes the ledger
/// if the transaction mines late.
pub async fn verify_and_settle(
    state: &AppState,
    service: &Service,
    tuple: &SignatureTuple,
) -> Result<SettledPayment, GatewayError> {
    let price = service_price(service)?;
    let expected = Expected {
        escrow: state.chain.escrow_address,
        price,
    };

    let payer = match state.engine.verify_authorization(tuple, &expected).await {
        Ok(payer) => payer,
        Err(e) => {
            metrics::PAYER_REJECTIONS.with_label_values(&[e.kind()]).inc();
            return Err(e.into());
        }
    };

    let start = std::time::Instant::now();
    let settlement = match state
        .engine
        .settle_processor(tuple, service_id_hash(&service.id))
        .await
    {
        Ok(s) => s,
        Err(e) => {
            metrics::SETTLEMENTS_TOTAL
                .with_label_values(&["processor", "failed"])
                .inc();
            metrics::SETTLE_LATENCY
                .with_label_values(&["failed"])
                .observe(start.elapsed().as_secs_f64());
            tracing::error!(
                payer = %payer,
                service = %service.id,
                nonce = %tuple.nonce,
                kind = e.kind(),
                "settlement failed: {e}"
            );
            return Err(e.into());
        }
    };

    let (platform_fee, provider_share) = split_fee(settlement.amount, state.config.platform_fee_bps);
    let paid = SettledPayment {
        settlement,
        platform_fee,
        provider_share,
    };

    match settlement.status {
        SettlementStatus::Confirmed | SettlementStatus::Submitted => {
            metrics::SETTLEMENTS_TOTAL
                .with_label_values(&["processor", "success"])
                .inc();
            metrics::SETTLE_LATENCY
                .with_label_values(&["success"])
                .observe(start.elapsed().as_secs_f64());
            record_ledger(state, service, &paid);
        }
        SettlementStatus::TimedOut => {
            metrics::SETTLEMENTS_TOTAL
                .with_label_values(&["processor", "timed_out"])
                .inc();
            spawn_ledger_reconciler(state.clone(), service.clone(), paid);
        }
    }

    Ok(paid)
}

/// Write the access log row and bump the provider mirror.
fn record_ledger(state: &AppState, service: &Service, paid: &SettledPayment) {
    let result = state.db.record_settlement(
        Some(&service.id),
        &format!("{:#x}", paid.settlement.payer),
        &service.provider_address,
        &paid.settlement.amount.to_string(),
        &paid.provider_share.to_string(),
        &format!("{:#x}", paid.settlement.tx_hash),
    );
    if let Err(e) = result {
        // The payment is on-chain; a mirror write failure must not fail the
        // request, only the reporting.
        tracing::error!(
            service = %service.id,
            tx = %paid.settlement.tx_hash,
            "ledger mirror write failed: {e}"
        );
        return;
    }
    metrics::SERVICE_PAYMENTS
        .with_label_values(&[service.id.as_str()])
        .inc();
    if let Ok(share) = u64::try_from(paid.provider_share) {
        metrics::SERVICE_REVENUE
            .with_label_values(&[service.id.as_str()])
            .inc_by(share);
    }
}

/// After a confirmation timeout the transaction may still mine. Poll for the
/// receipt from a detached task and write the ledger when (if) it lands.
fn spawn_ledger_reconciler(state: AppState, service: Service, paid: SettledPayment) {
    tokio::spawn(async move {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(state.config.confirmation_timeout_secs * 4);
        let mut interval = tokio::time::interval(Duration::from_secs(3));
        loop {
            interval.tick().await;
            match state.engine.fetch_receipt_status(paid.settlement.tx_hash).await {
                Ok(Some(true)) => {
                    tracing::info!(
                        service = %service.id,
                        tx = %paid.settlement.tx_hash,
                        "late confirmation, reconciling ledger"
                    );
                    record_ledger(&state, &service, &paid);
                    return;
                }
                Ok(Some(false)) => {
                    tracing::error!(
                        service = %service.id,
                        tx = %paid.settlement.tx_hash,
                        "timed-out settlement reverted"
                    );
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(tx = %paid.settlement.tx_hash, "reconciler probe failed: {e}");
                }
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    tx = %paid.settlement.tx_hash,
                    "reconciler gave up; transaction never mined"
                );
                return;
            }
        }
    });
}
