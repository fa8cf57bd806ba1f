use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DecisionLabels {
    pub gate: Gate,
    pub outcome: Outcome,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Gate {
    Username,
    Identity,
    Authorization,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Accepted,
    Rejected,
    Error,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ServiceLabels {
    pub service: RemoteService,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum RemoteService {
    Keys,
    Admin,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every Prometheus metric exposed by the gateway.
pub struct Metrics {
    pub gate_decisions: Family<DecisionLabels, Counter>,
    pub remote_call_duration_seconds: Family<ServiceLabels, Histogram>,
    pub active_connections: Gauge,
}

impl Metrics {
    pub fn new(registry: &mut Registry) -> Self {
        let gate_decisions = Family::<DecisionLabels, Counter>::default();
        registry.register(
            "gitgate_gate_decisions",
            "Gate decisions by gate and outcome",
            gate_decisions.clone(),
        );

        let remote_call_duration_seconds =
            Family::<ServiceLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.005, 2.0, 12))
            });
        registry.register(
            "gitgate_remote_call_duration_seconds",
            "Latency of calls to the keys and admin services",
            remote_call_duration_seconds.clone(),
        );

        let active_connections: Gauge = Gauge::default();
        registry.register(
            "gitgate_active_connections",
            "Currently open SSH connections",
            active_connections.clone(),
        );

        Self {
            gate_decisions,
            remote_call_duration_seconds,
            active_connections,
        }
    }

    pub fn record(&self, gate: Gate, outcome: Outcome) {
        self.gate_decisions
            .get_or_create(&DecisionLabels { gate, outcome })
            .inc();
    }

    pub fn observe_call(&self, service: RemoteService, seconds: f64) {
        self.remote_call_duration_seconds
            .get_or_create(&ServiceLabels { service })
            .observe(seconds);
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Registry plus metric handles, shared between the gates and `/metrics`.
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
