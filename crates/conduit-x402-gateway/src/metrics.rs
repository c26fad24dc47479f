use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Who may scrape `/metrics`.
///
/// The scrape surface leaks per-service revenue and payer-rejection counts,
/// so it defaults to closed. Resolved once from `METRICS_TOKEN` /
/// `METRICS_EXPOSURE` at startup; routes never consult the environment.
#[derive(Clone, Default)]
pub enum MetricsExposure {
    /// No credential configured and not explicitly opened: refuse everyone.
    #[default]
    Closed,
    /// `METRICS_EXPOSURE=open`: unauthenticated scrapes allowed.
    Open,
    /// `METRICS_TOKEN` set: requires `Authorization: Bearer <token>`.
    Bearer(Vec<u8>),
}

impl MetricsExposure {
    /// Decide whether a request may scrape. `Err` carries the HTTP status
    /// and refusal message.
    pub fn permit(&self, authorization: Option<&str>) -> Result<(), (u16, &'static str)> {
        match self {
            MetricsExposure::Open => Ok(()),
            MetricsExposure::Closed => Err((
                403,
                "metrics are closed; set METRICS_TOKEN or METRICS_EXPOSURE=open",
            )),
            MetricsExposure::Bearer(expected) => {
                let presented = authorization.and_then(|h| h.strip_prefix("Bearer "));
                match presented {
                    Some(token) if digest_eq(token.as_bytes(), expected) => Ok(()),
                    _ => Err((401, "bearer token required for /metrics")),
                }
            }
        }
    }
}

impl std::fmt::Debug for MetricsExposure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricsExposure::Closed => f.write_str("Closed"),
            MetricsExposure::Open => f.write_str("Open"),
            MetricsExposure::Bearer(_) => f.write_str("Bearer([REDACTED])"),
        }
    }
}

/// Token comparison that hides both content and length: each side is reduced
/// to its SHA-256 digest and the digests are compared in constant time.
fn digest_eq(presented: &[u8], expected: &[u8]) -> bool {
    use sha2::{Digest, Sha256};
    use subtle::ConstantTimeEq;
    Sha256::digest(presented).ct_eq(&Sha256::digest(expected)).into()
}

pub static CHALLENGES_ISSUED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("gateway_challenges_issued_total", "402 challenges issued").unwrap()
});

// Settlements by path (processor vs legacy direct) and result.
pub static SETTLEMENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("gateway_settlements_total", "Settlement attempts"),
        &["path", "result"],
    )
    .unwrap()
});

pub static SETTLE_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "gateway_settle_duration_seconds",
            "Settlement latency in seconds",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["result"],
    )
    .unwrap()
});

// The legacy direct-token path leaves provider ledgers uncredited on-chain;
// every use is worth counting on its own.
pub static LEGACY_DIRECT_SETTLEMENTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gateway_legacy_direct_settlements_total",
        "Settlements through the direct-token path (no escrow credit)",
    )
    .unwrap()
});

pub static SERVICE_PAYMENTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "gateway_service_payments_total",
            "Settled payments per service",
        ),
        &["service"],
    )
    .unwrap()
});

pub static SERVICE_REVENUE: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "gateway_service_revenue_base_units",
            "Provider revenue in token base units per service",
        ),
        &["service"],
    )
    .unwrap()
});

pub static PROXY_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("gateway_proxy_latency_seconds", "Upstream request latency")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .unwrap()
});

pub static UPSTREAM_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gateway_upstream_failures_total",
        "Paid requests whose upstream fetch failed",
    )
    .unwrap()
});

pub static PAYER_REJECTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "gateway_payer_rejections_total",
            "Requests refused before settlement",
        ),
        &["reason"],
    )
    .unwrap()
});

pub static CLAIMS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("gateway_claims_total", "Provider withdrawal attempts"),
        &["result"],
    )
    .unwrap()
});

/// Register all metrics with the registry. Call once at startup.
pub fn register_metrics() {
    REGISTRY
        .register(Box::new(CHALLENGES_ISSUED.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SETTLEMENTS_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(SETTLE_LATENCY.clone())).unwrap();
    REGISTRY
        .register(Box::new(LEGACY_DIRECT_SETTLEMENTS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SERVICE_PAYMENTS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SERVICE_REVENUE.clone()))
        .unwrap();
    REGISTRY.register(Box::new(PROXY_LATENCY.clone())).unwrap();
    REGISTRY
        .register(Box::new(UPSTREAM_FAILURES.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(PAYER_REJECTIONS.clone()))
        .unwrap();
    REGISTRY.register(Box::new(CLAIMS_TOTAL.clone())).unwrap();
}
