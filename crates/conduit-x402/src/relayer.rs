//! Relayer / settlement engine.
//!
//! Translates verified payment authorizations into on-chain settlements. The
//! relayer key pays gas for every transaction, so the engine owns three
//! disciplines the rest of the system relies on:
//!
//! - **Nonce allocation**: the relayer's ethereum nonce is synced from chain
//!   once, then handed out locally behind a mutex. Failed sends requeue their
//!   nonce. No per-send chain reads.
//! - **Gas policy**: hardcoded limits. `estimateGas` returns
//!   UNPREDICTABLE_GAS_LIMIT on the target chain for the nested
//!   processor → token → escrow call and cannot be trusted.
//! - **Confirmation policy**: optimistic (ack after broadcast, watch in the
//!   background), one confirmation (default, block until mined), or deep.
//!
//! A broadcast transaction mines whether or not the inbound request survives;
//! receipt watchers are spawned tasks that outlive the request.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::Provider;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::contracts::{self, IEIP3009, IPaymentProcessor, IServiceRegistry, IEscrow};
use crate::payment::SignatureTuple;
use crate::verify::{self, Expected};
use crate::{
    ChainConfig, X402Error, DIRECT_TRANSFER_GAS_LIMIT, PROCESS_PAYMENT_GAS_LIMIT,
};

/// Gas limit for registry/escrow administration calls.
const ADMIN_GAS_LIMIT: u64 = 300_000;

/// Bound on the RPC round-trip for a transaction broadcast.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval for background receipt watchers.
const WATCH_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Reverted optimistic settlements before a payer is refused outright.
const BLACKLIST_STRIKES: u32 = 3;

/// How many settlements a single payer may have in flight at once.
const DEFAULT_MAX_INFLIGHT_PER_PAYER: usize = 4;

/// How the engine reports success relative to chain confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationPolicy {
    /// Ack as soon as the broadcast succeeds; confirm in the background.
    /// Trades correctness for latency; requires the in-flight cap and
    /// blacklist to stay on.
    Optimistic,
    /// Block until the transaction is mined (default).
    OneConf,
    /// Block until n confirmations.
    Deep(u64),
}

/// Terminal state of one settlement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementStatus {
    /// Mined with success status.
    Confirmed,
    /// Broadcast under the optimistic policy; not yet mined.
    Submitted,
    /// Confirmation wait expired; the transaction may still mine.
    TimedOut,
}

/// Outcome of a settlement that made it on the wire.
#[derive(Debug, Clone, Copy)]
pub struct Settlement {
    pub status: SettlementStatus,
    pub tx_hash: TxHash,
    pub payer: Address,
    pub amount: U256,
}

/// Mutex-guarded local allocator for the relayer's ethereum nonce.
///
/// Freed (requeued) nonces are reused lowest-first so the sequence stays
/// gap-free; a gap beyond the node's queue window would stall every later
/// transaction.
pub struct RelayerNonceAllocator {
    state: Mutex<NonceState>,
}

struct NonceState {
    next: Option<u64>,
    freed: BTreeSet<u64>,
}

impl RelayerNonceAllocator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NonceState {
                next: None,
                freed: BTreeSet::new(),
            }),
        }
    }

    /// Seed the counter from the chain's pending transaction count. Later
    /// calls are no-ops: local allocation is authoritative after the first
    /// sync.
    pub async fn seed(&self, chain_nonce: u64) {
        let mut state = self.state.lock().await;
        if state.next.is_none() {
            state.next = Some(chain_nonce);
        }
    }

    /// Hand out the next nonce: the lowest requeued one if any, otherwise
    /// the counter. Returns `None` before the first [`seed`](Self::seed).
    pub async fn allocate(&self) -> Option<u64> {
        let mut state = self.state.lock().await;
        if let Some(&lowest) = state.freed.iter().next() {
            state.freed.remove(&lowest);
            return Some(lowest);
        }
        let next = state.next?;
        state.next = Some(next + 1);
        Some(next)
    }

    /// Return a nonce whose send never reached the network.
    pub async fn requeue(&self, nonce: u64) {
        let mut state = self.state.lock().await;
        state.freed.insert(nonce);
    }
}

impl Default for RelayerNonceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the payer's in-flight count when the settlement attempt ends,
/// however it ends.
#[derive(Debug)]
pub struct InflightGuard {
    inflight: Arc<DashMap<Address, usize>>,
    payer: Address,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if let Some(mut entry) = self.inflight.get_mut(&self.payer) {
            *entry = entry.saturating_sub(1);
            if *entry == 0 {
                drop(entry);
                self.inflight.remove_if(&self.payer, |_, count| *count == 0);
            }
        }
    }
}

/// The settlement engine. One per process; shared across request tasks.
pub struct SettlementEngine<P> {
    provider: Arc<P>,
    relayer_address: Address,
    config: ChainConfig,
    policy: ConfirmationPolicy,
    confirmation_timeout: Duration,
    nonces: RelayerNonceAllocator,
    inflight: Arc<DashMap<Address, usize>>,
    strikes: Arc<DashMap<Address, u32>>,
    max_inflight_per_payer: usize,
}

impl<P> SettlementEngine<P>
where
    P: Provider + Send + Sync + 'static,
{
    pub fn new(
        provider: Arc<P>,
        relayer_address: Address,
        config: ChainConfig,
        policy: ConfirmationPolicy,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            relayer_address,
            config,
            policy,
            confirmation_timeout,
            nonces: RelayerNonceAllocator::new(),
            inflight: Arc::new(DashMap::new()),
            strikes: Arc::new(DashMap::new()),
            max_inflight_per_payer: DEFAULT_MAX_INFLIGHT_PER_PAYER,
        }
    }

    pub fn relayer_address(&self) -> Address {
        self.relayer_address
    }

    pub fn chain_config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn policy(&self) -> ConfirmationPolicy {
        self.policy
    }

    /// Sync the relayer nonce from the chain's pending count. Call once at
    /// startup; allocation is local afterwards.
    pub async fn sync_relayer_nonce(&self) -> Result<u64, X402Error> {
        let chain_nonce = self
            .provider
            .get_transaction_count(self.relayer_address)
            .pending()
            .await
            .map_err(|e| X402Error::ChainError(format!("nonce sync failed: {e}")))?;
        self.nonces.seed(chain_nonce).await;
        Ok(chain_nonce)
    }

    async fn allocate_nonce(&self) -> Result<u64, X402Error> {
        if let Some(nonce) = self.nonces.allocate().await {
            return Ok(nonce);
        }
        self.sync_relayer_nonce().await?;
        self.nonces
            .allocate()
            .await
            .ok_or_else(|| X402Error::ChainError("nonce allocator unseeded".to_string()))
    }

    /// Read a provider's claimable balance from the escrow contract.
    pub async fn provider_claimable(&self, wallet: Address) -> Result<U256, X402Error> {
        contracts::provider_balance(&*self.provider, self.config.escrow_address, wallet).await
    }

    /// One-shot receipt probe: `Some(status)` once mined, `None` while
    /// pending. Used by ledger reconciliation after a confirmation timeout.
    pub async fn fetch_receipt_status(&self, tx_hash: TxHash) -> Result<Option<bool>, X402Error> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| X402Error::ChainError(format!("receipt probe failed: {e}")))?;
        Ok(receipt.map(|r| r.status()))
    }

    /// RPC liveness probe.
    pub async fn health_check(&self) -> Result<u64, X402Error> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| X402Error::ChainError(format!("health check failed: {e}")))
    }

    /// Full off-chain verification of an authorization, in order: destination,
    /// value, validity window, on-chain nonce freshness, signature recovery.
    /// Pure checks run first so a doomed payload never costs an RPC call.
    pub async fn verify_authorization(
        &self,
        tuple: &SignatureTuple,
        expected: &Expected,
    ) -> Result<Address, X402Error> {
        verify::check_destination(tuple, expected)?;
        verify::check_value(tuple, expected)?;
        verify::check_window(tuple, verify::unix_now())?;

        if contracts::is_nonce_used(
            &*self.provider,
            self.config.processor_address,
            tuple.from,
            tuple.nonce,
        )
        .await?
        {
            return Err(X402Error::NonceUsed);
        }

        verify::check_signer(tuple, &self.config)
    }

    /// Reserve an in-flight slot for a payer. Refuses blacklisted payers and
    /// payers at the concurrency cap; both matter under optimistic settlement
    /// where a griefing payer could burn relayer gas for free.
    pub fn begin_inflight(&self, payer: Address) -> Result<InflightGuard, X402Error> {
        if self.strike_count(payer) >= BLACKLIST_STRIKES {
            return Err(X402Error::RateLimited(format!(
                "payer {payer} blacklisted after repeated reverted settlements"
            )));
        }
        let mut entry = self.inflight.entry(payer).or_insert(0);
        if *entry >= self.max_inflight_per_payer {
            return Err(X402Error::RateLimited(format!(
                "payer {payer} has {} settlements in flight",
                *entry
            )));
        }
        *entry += 1;
        drop(entry);
        Ok(InflightGuard {
            inflight: Arc::clone(&self.inflight),
            payer,
        })
    }

    pub fn record_strike(&self, payer: Address) {
        *self.strikes.entry(payer).or_insert(0) += 1;
    }

    pub fn strike_count(&self, payer: Address) -> u32 {
        self.strikes.get(&payer).map(|s| *s).unwrap_or(0)
    }

    fn normalized_v(tuple: &SignatureTuple) -> u8 {
        if tuple.v < 27 {
            tuple.v + 27
        } else {
            tuple.v
        }
    }

    /// Map a chain-layer error string onto the verification taxonomy where a
    /// known revert reason allows it. A reasonless revert stays
    /// SETTLEMENT_FAILED.
    pub fn translate_revert(message: &str) -> X402Error {
        let lower = message.to_lowercase();
        if lower.contains("authorization is used") || lower.contains("nonce already used") {
            X402Error::NonceUsed
        } else if lower.contains("service not active") {
            X402Error::ServiceInactive(message.to_string())
        } else if lower.contains("insufficient payment") {
            X402Error::InsufficientValue(message.to_string())
        } else {
            X402Error::SettlementFailed(message.to_string())
        }
    }

    /// Settle through `PaymentProcessor.processPayment`, the preferred path.
    /// The processor pulls the tokens via `receiveWithAuthorization` and
    /// credits the provider through `escrow.receivePayment`, atomically.
    pub async fn settle_processor(
        &self,
        tuple: &SignatureTuple,
        service_id_hash: alloy::primitives::B256,
    ) -> Result<Settlement, X402Error> {
        let _guard = self.begin_inflight(tuple.from)?;
        let nonce = self.allocate_nonce().await?;

        let contract = IPaymentProcessor::new(self.config.processor_address, &*self.provider);
        let call = contract
            .processPayment(
                service_id_hash,
                tuple.from,
                tuple.value,
                U256::from(tuple.valid_after),
                U256::from(tuple.valid_before),
                tuple.nonce,
                Self::normalized_v(tuple),
                tuple.r,
                tuple.s,
            )
            .from(self.relayer_address)
            .nonce(nonce)
            .gas(PROCESS_PAYMENT_GAS_LIMIT);

        let pending = match tokio::time::timeout(SUBMIT_TIMEOUT, call.send()).await {
            Err(_) => {
                self.nonces.requeue(nonce).await;
                return Err(X402Error::ChainError(
                    "processPayment broadcast timed out".to_string(),
                ));
            }
            Ok(Err(e)) => {
                self.nonces.requeue(nonce).await;
                return Err(Self::translate_revert(&e.to_string()));
            }
            Ok(Ok(pending)) => pending,
        };

        let tx_hash = *pending.tx_hash();
        tracing::info!(
            payer = %tuple.from,
            amount = %tuple.value,
            tx = %tx_hash,
            relayer_nonce = nonce,
            "processPayment submitted"
        );

        self.finish(pending, tx_hash, tuple.from, tuple.value).await
    }

    /// Legacy path: call `receiveWithAuthorization` straight on the token.
    ///
    /// Moves the funds into the escrow WITHOUT crediting the provider ledger:
    /// `escrow.receivePayment` never runs, so the amount is trapped until an
    /// operator intervenes. Only for delegation calls with no service binding,
    /// where the caller accepts that risk.
    pub async fn settle_direct(&self, tuple: &SignatureTuple) -> Result<Settlement, X402Error> {
        let _guard = self.begin_inflight(tuple.from)?;
        let nonce = self.allocate_nonce().await?;

        tracing::warn!(
            payer = %tuple.from,
            amount = %tuple.value,
            "LEGACY direct-token settlement: provider ledger will NOT be credited on-chain"
        );

        let contract = IEIP3009::new(self.config.token_address, &*self.provider);
        let call = contract
            .receiveWithAuthorization(
                tuple.from,
                tuple.to,
                tuple.value,
                U256::from(tuple.valid_after),
                U256::from(tuple.valid_before),
                tuple.nonce,
                Self::normalized_v(tuple),
                tuple.r,
                tuple.s,
            )
            .from(self.relayer_address)
            .nonce(nonce)
            .gas(DIRECT_TRANSFER_GAS_LIMIT);

        let pending = match tokio::time::timeout(SUBMIT_TIMEOUT, call.send()).await {
            Err(_) => {
                self.nonces.requeue(nonce).await;
                return Err(X402Error::ChainError(
                    "receiveWithAuthorization broadcast timed out".to_string(),
                ));
            }
            Ok(Err(e)) => {
                self.nonces.requeue(nonce).await;
                return Err(Self::translate_revert(&e.to_string()));
            }
            Ok(Ok(pending)) => pending,
        };

        let tx_hash = *pending.tx_hash();
        self.finish(pending, tx_hash, tuple.from, tuple.value).await
    }

    /// Apply the confirmation policy to a broadcast transaction.
    async fn finish(
        &self,
        pending: alloy::providers::PendingTransactionBuilder<alloy::network::Ethereum>,
        tx_hash: TxHash,
        payer: Address,
        amount: U256,
    ) -> Result<Settlement, X402Error> {
        match self.policy {
            ConfirmationPolicy::Optimistic => {
                self.spawn_receipt_watcher(tx_hash, payer);
                Ok(Settlement {
                    status: SettlementStatus::Submitted,
                    tx_hash,
                    payer,
                    amount,
                })
            }
            ConfirmationPolicy::OneConf | ConfirmationPolicy::Deep(_) => {
                let pending = match self.policy {
                    ConfirmationPolicy::Deep(n) => pending.with_required_confirmations(n),
                    _ => pending,
                };
                match tokio::time::timeout(self.confirmation_timeout, pending.get_receipt()).await {
                    Err(_) => {
                        // Already broadcast: the nonce is spent and the tx may
                        // still mine. The watcher logs the eventual outcome.
                        self.spawn_receipt_watcher(tx_hash, payer);
                        Ok(Settlement {
                            status: SettlementStatus::TimedOut,
                            tx_hash,
                            payer,
                            amount,
                        })
                    }
                    Ok(Err(e)) => {
                        self.spawn_receipt_watcher(tx_hash, payer);
                        Err(X402Error::ChainError(format!(
                            "receipt fetch for {tx_hash} failed: {e}"
                        )))
                    }
                    Ok(Ok(receipt)) => {
                        if receipt.status() {
                            tracing::info!(payer = %payer, tx = %tx_hash, "settlement confirmed");
                            Ok(Settlement {
                                status: SettlementStatus::Confirmed,
                                tx_hash,
                                payer,
                                amount,
                            })
                        } else {
                            tracing::error!(payer = %payer, tx = %tx_hash, "settlement reverted");
                            Err(X402Error::SettlementFailed(format!(
                                "transaction {tx_hash} reverted"
                            )))
                        }
                    }
                }
            }
        }
    }

    /// Watch a broadcast transaction from a detached task. Outlives the
    /// request: client disconnects must not orphan the outcome. Reverts under
    /// the optimistic policy earn the payer a strike.
    fn spawn_receipt_watcher(&self, tx_hash: TxHash, payer: Address) {
        let provider = Arc::clone(&self.provider);
        let strikes = Arc::clone(&self.strikes);
        let deadline = tokio::time::Instant::now() + self.confirmation_timeout * 4;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(WATCH_POLL_INTERVAL);
            loop {
                interval.tick().await;
                match provider.get_transaction_receipt(tx_hash).await {
                    Ok(Some(receipt)) => {
                        if receipt.status() {
                            tracing::info!(payer = %payer, tx = %tx_hash, "background confirmation");
                        } else {
                            tracing::error!(
                                payer = %payer,
                                tx = %tx_hash,
                                "background watcher observed revert"
                            );
                            *strikes.entry(payer).or_insert(0) += 1;
                        }
                        return;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(tx = %tx_hash, error = %e, "receipt poll failed");
                    }
                }
                if tokio::time::Instant::now() >= deadline {
                    tracing::warn!(tx = %tx_hash, "gave up watching unmined transaction");
                    return;
                }
            }
        });
    }

    /// Wait one confirmation on an admin transaction and translate the
    /// outcome. Admin calls always block regardless of the settlement policy.
    async fn finish_admin(
        &self,
        label: &str,
        pending: alloy::providers::PendingTransactionBuilder<alloy::network::Ethereum>,
    ) -> Result<TxHash, X402Error> {
        let tx_hash = *pending.tx_hash();
        match tokio::time::timeout(self.confirmation_timeout, pending.get_receipt()).await {
            Err(_) => Err(X402Error::TimedOut(format!(
                "{label} {tx_hash} not mined within timeout"
            ))),
            Ok(Err(e)) => Err(X402Error::ChainError(format!(
                "{label} receipt failed: {e}"
            ))),
            Ok(Ok(receipt)) if receipt.status() => Ok(tx_hash),
            Ok(Ok(_)) => Err(Self::translate_revert(&format!("{label} {tx_hash} reverted"))),
        }
    }

    /// Register a service on-chain. Relayer-only: the relayer key is the
    /// registry owner.
    pub async fn register_service(
        &self,
        service_id_hash: alloy::primitives::B256,
        provider_wallet: Address,
        price: U256,
        name: &str,
        endpoint: &str,
    ) -> Result<TxHash, X402Error> {
        let nonce = self.allocate_nonce().await?;
        let contract = IServiceRegistry::new(self.config.registry_address, &*self.provider);
        let call = contract
            .registerService(
                service_id_hash,
                provider_wallet,
                price,
                name.to_string(),
                endpoint.to_string(),
            )
            .from(self.relayer_address)
            .nonce(nonce)
            .gas(ADMIN_GAS_LIMIT);

        let pending = match tokio::time::timeout(SUBMIT_TIMEOUT, call.send()).await {
            Err(_) => {
                self.nonces.requeue(nonce).await;
                return Err(X402Error::ChainError(
                    "registerService broadcast timed out".to_string(),
                ));
            }
            Ok(Err(e)) => {
                self.nonces.requeue(nonce).await;
                return Err(Self::translate_revert(&e.to_string()));
            }
            Ok(Ok(pending)) => pending,
        };
        self.finish_admin("registerService", pending).await
    }

    /// Update a service's on-chain price.
    pub async fn update_price(
        &self,
        service_id_hash: alloy::primitives::B256,
        price: U256,
    ) -> Result<TxHash, X402Error> {
        let nonce = self.allocate_nonce().await?;
        let contract = IServiceRegistry::new(self.config.registry_address, &*self.provider);
        let call = contract
            .updatePrice(service_id_hash, price)
            .from(self.relayer_address)
            .nonce(nonce)
            .gas(ADMIN_GAS_LIMIT);

        let pending = match tokio::time::timeout(SUBMIT_TIMEOUT, call.send()).await {
            Err(_) => {
                self.nonces.requeue(nonce).await;
                return Err(X402Error::ChainError(
                    "updatePrice broadcast timed out".to_string(),
                ));
            }
            Ok(Err(e)) => {
                self.nonces.requeue(nonce).await;
                return Err(Self::translate_revert(&e.to_string()));
            }
            Ok(Ok(pending)) => pending,
        };
        self.finish_admin("updatePrice", pending).await
    }

    /// Activate or deactivate a service on-chain.
    pub async fn set_active(
        &self,
        service_id_hash: alloy::primitives::B256,
        active: bool,
    ) -> Result<TxHash, X402Error> {
        let nonce = self.allocate_nonce().await?;
        let contract = IServiceRegistry::new(self.config.registry_address, &*self.provider);
        let call = contract
            .setActive(service_id_hash, active)
            .from(self.relayer_address)
            .nonce(nonce)
            .gas(ADMIN_GAS_LIMIT);

        let pending = match tokio::time::timeout(SUBMIT_TIMEOUT, call.send()).await {
            Err(_) => {
                self.nonces.requeue(nonce).await;
                return Err(X402Error::ChainError(
                    "setActive broadcast timed out".to_string(),
                ));
            }
            Ok(Err(e)) => {
                self.nonces.requeue(nonce).await;
                return Err(Self::translate_revert(&e.to_string()));
            }
            Ok(Ok(pending)) => pending,
        };
        self.finish_admin("setActive", pending).await
    }

    /// Withdraw a provider's claimable balance on their behalf. The relayer
    /// holds the escrow's relayer role, so the provider spends no gas.
    pub async fn withdraw(
        &self,
        provider_wallet: Address,
        amount: U256,
    ) -> Result<TxHash, X402Error> {
        let nonce = self.allocate_nonce().await?;
        let contract = IEscrow::new(self.config.escrow_address, &*self.provider);
        let call = contract
            .withdraw(provider_wallet, amount)
            .from(self.relayer_address)
            .nonce(nonce)
            .gas(ADMIN_GAS_LIMIT);

        let pending = match tokio::time::timeout(SUBMIT_TIMEOUT, call.send()).await {
            Err(_) => {
                self.nonces.requeue(nonce).await;
                return Err(X402Error::ChainError(
                    "withdraw broadcast timed out".to_string(),
                ));
            }
            Ok(Err(e)) => {
                self.nonces.requeue(nonce).await;
                return Err(Self::translate_revert(&e.to_string()));
            }
            Ok(Ok(pending)) => pending,
        };
        self.finish_admin("withdraw", pending).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocator_unseeded_returns_none() {
        let alloc = RelayerNonceAllocator::new();
        assert_eq!(alloc.allocate().await, None);
    }

    #[tokio::test]
    async fn allocator_is_monotonic_after_seed() {
        let alloc = RelayerNonceAllocator::new();
        alloc.seed(7).await;
        assert_eq!(alloc.allocate().await, Some(7));
        assert_eq!(alloc.allocate().await, Some(8));
        assert_eq!(alloc.allocate().await, Some(9));
    }

    #[tokio::test]
    async fn allocator_reuses_requeued_lowest_first() {
        let alloc = RelayerNonceAllocator::new();
        alloc.seed(0).await;
        let a = alloc.allocate().await.unwrap();
        let b = alloc.allocate().await.unwrap();
        let c = alloc.allocate().await.unwrap();
        assert_eq!((a, b, c), (0, 1, 2));

        alloc.requeue(b).await;
        alloc.requeue(a).await;
        assert_eq!(alloc.allocate().await, Some(0));
        assert_eq!(alloc.allocate().await, Some(1));
        assert_eq!(alloc.allocate().await, Some(3));
    }

    #[tokio::test]
    async fn seed_is_idempotent() {
        let alloc = RelayerNonceAllocator::new();
        alloc.seed(5).await;
        alloc.seed(100).await;
        assert_eq!(alloc.allocate().await, Some(5));
    }

    #[test]
    fn revert_translation_maps_known_reasons() {
        type Engine = SettlementEngine<alloy::providers::RootProvider>;
        assert_eq!(
            Engine::translate_revert("execution reverted: authorization is used").kind(),
            "NONCE_USED"
        );
        assert_eq!(
            Engine::translate_revert("execution reverted: Nonce already used").kind(),
            "NONCE_USED"
        );
        assert_eq!(
            Engine::translate_revert("execution reverted: Service not active").kind(),
            "SERVICE_INACTIVE"
        );
        assert_eq!(
            Engine::translate_revert("execution reverted: Insufficient payment").kind(),
            "INSUFFICIENT_VALUE"
        );
        assert_eq!(
            Engine::translate_revert("execution reverted").kind(),
            "SETTLEMENT_FAILED"
        );
    }

    fn test_engine() -> SettlementEngine<alloy::providers::RootProvider> {
        let provider: alloy::providers::RootProvider =
            alloy::providers::RootProvider::new_http("http://localhost:1".parse().unwrap());
        SettlementEngine::new(
            Arc::new(provider),
            Address::ZERO,
            ChainConfig::default(),
            ConfirmationPolicy::OneConf,
            Duration::from_secs(30),
        )
    }

    #[test]
    fn inflight_cap_enforced_and_released() {
        let engine = test_engine();
        let payer = Address::repeat_byte(0xaa);

        let guards: Vec<_> = (0..DEFAULT_MAX_INFLIGHT_PER_PAYER)
            .map(|_| engine.begin_inflight(payer).unwrap())
            .collect();

        let err = engine.begin_inflight(payer).unwrap_err();
        assert_eq!(err.kind(), "RATE_LIMITED");

        drop(guards);
        assert!(engine.begin_inflight(payer).is_ok());
    }

    #[test]
    fn other_payers_unaffected_by_cap() {
        let engine = test_engine();
        let busy = Address::repeat_byte(0xaa);
        let idle = Address::repeat_byte(0xbb);

        let _guards: Vec<_> = (0..DEFAULT_MAX_INFLIGHT_PER_PAYER)
            .map(|_| engine.begin_inflight(busy).unwrap())
            .collect();
        assert!(engine.begin_inflight(idle).is_ok());
    }

    #[test]
    fn strikes_blacklist_payer() {
        let engine = test_engine();
        let payer = Address::repeat_byte(0xcc);

        for _ in 0..BLACKLIST_STRIKES {
            engine.record_strike(payer);
        }
        let err = engine.begin_inflight(payer).unwrap_err();
        assert_eq!(err.kind(), "RATE_LIMITED");
    }
}
