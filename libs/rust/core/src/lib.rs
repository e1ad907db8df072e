//! Engine for federated model training rounds: round lifecycle, quorum
//! driven aggregation, integrity verification, and result anchoring.
//! Transport services wrap the [`Coordinator`]; everything here is
//! transport-agnostic.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use once_cell::sync::OnceCell;
use opentelemetry_sdk::metrics::MeterProvider as SdkMeterProvider;
use prometheus::{Encoder, TextEncoder};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();
static PROM_INIT: OnceCell<()> = OnceCell::new();
static NODE_LIVENESS: AtomicBool = AtomicBool::new(true);
static NODE_READINESS: AtomicBool = AtomicBool::new(false);

pub fn mark_ready() {
    NODE_READINESS.store(true, Ordering::SeqCst);
}
pub fn clear_ready() {
    NODE_READINESS.store(false, Ordering::SeqCst);
}
pub fn mark_not_live() {
    NODE_LIVENESS.store(false, Ordering::SeqCst);
}
pub fn is_ready() -> bool {
    NODE_READINESS.load(Ordering::SeqCst)
}
pub fn is_live() -> bool {
    NODE_LIVENESS.load(Ordering::SeqCst)
}

/// Installs the fmt subscriber: `RUST_LOG` filter with an `info` fallback,
/// JSON output when `FED_JSON_LOG=1`. Safe to call more than once.
pub fn init_tracing(service: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json = std::env::var("FED_JSON_LOG")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .flatten_event(true)
                        .with_current_span(true)
                        .with_span_list(false),
                )
                .try_init()?;
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_target(true).with_line_number(true))
                .try_init()?;
        }
        Ok(())
    })?;
    info!(service, "tracing_initialized");
    Ok(())
}

/// Binds the OpenTelemetry meter provider to the default prometheus
/// registry so instrument values land in [`render_metrics`] output.
/// Idempotent.
pub fn init_metrics() -> Result<()> {
    PROM_INIT.get_or_try_init(|| -> Result<()> {
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(prometheus::default_registry().clone())
            .build()?;
        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        opentelemetry::global::set_meter_provider(provider);
        Ok(())
    })?;
    Ok(())
}

/// Encodes the default prometheus registry in text exposition format.
pub fn render_metrics() -> Result<Vec<u8>> {
    let metric_families = prometheus::default_registry().gather();
    let mut buf = Vec::new();
    TextEncoder::new().encode(&metric_families, &mut buf)?;
    Ok(buf)
}

pub mod aggregator;
pub mod anchor;
pub mod artifact;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod integrity;
pub mod model;
pub mod resilience;
pub mod round;
pub mod store;

pub use anchor::{AnchorLedger, LogLedger, RoundMetrics, SubmissionRecord};
pub use artifact::{ArtifactStore, ContentId, MemoryArtifactStore};
pub use config::{load_config, load_seed_model, CoordinatorConfig};
pub use coordinator::{Coordinator, StatsSnapshot};
pub use error::CoordinationError;
pub use integrity::fingerprint;
pub use model::{
    AggregationResult, ClientUpdate, GlobalModel, ModelVersion, ParameterSet, RoundId, Tensor,
};
pub use resilience::{retry_async, RetryConfig};
pub use round::{RoundSnapshot, RoundStatus};
