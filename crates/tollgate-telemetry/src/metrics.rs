//! Metric names and the gateway's instrument set

use std::time::Instant;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};

pub const GATEWAY_REQUEST_COUNT: &str = "tollgate.request.count";
pub const GATEWAY_DENIAL_COUNT: &str = "tollgate.admission.denied";
pub const UPSTREAM_DURATION: &str = "tollgate.upstream.duration";
pub const MODEL_FALLBACK_COUNT: &str = "tollgate.model.fallback";
pub const SYNC_BROADCAST_COUNT: &str = "tollgate.sync.broadcast";

/// Instruments recorded by the request path
///
/// Built from the global meter provider, so recording is a no-op until
/// telemetry installs an exporter.
#[derive(Clone)]
pub struct GatewayMetrics {
    requests: Counter<u64>,
    denials: Counter<u64>,
    upstream_duration: Histogram<f64>,
    fallbacks: Counter<u64>,
    broadcasts: Counter<u64>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        let meter = global::meter("tollgate");

        Self {
            requests: meter
                .u64_counter(GATEWAY_REQUEST_COUNT)
                .with_description("Requests by feature and final outcome")
                .build(),
            denials: meter
                .u64_counter(GATEWAY_DENIAL_COUNT)
                .with_description("Admission denials by reason")
                .build(),
            upstream_duration: meter
                .f64_histogram(UPSTREAM_DURATION)
                .with_unit("s")
                .with_description("Duration of upstream provider calls")
                .build(),
            fallbacks: meter
                .u64_counter(MODEL_FALLBACK_COUNT)
                .with_description("Requests served by a fallback model")
                .build(),
            broadcasts: meter
                .u64_counter(SYNC_BROADCAST_COUNT)
                .with_description("Sync events delivered to connections")
                .build(),
        }
    }

    pub fn record_request(&self, feature: &str, outcome: &str) {
        self.requests.add(
            1,
            &[
                KeyValue::new("feature", feature.to_owned()),
                KeyValue::new("outcome", outcome.to_owned()),
            ],
        );
    }

    pub fn record_denial(&self, feature: &str, reason: &str) {
        self.denials.add(
            1,
            &[
                KeyValue::new("feature", feature.to_owned()),
                KeyValue::new("reason", reason.to_owned()),
            ],
        );
    }

    pub fn record_upstream(&self, feature: &str, start: Instant, demo: bool) {
        self.upstream_duration.record(
            start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("feature", feature.to_owned()),
                KeyValue::new("demo", demo),
            ],
        );
    }

    pub fn record_fallback(&self, feature: &str, model: &str) {
        self.fallbacks.add(
            1,
            &[
                KeyValue::new("feature", feature.to_owned()),
                KeyValue::new("model", model.to_owned()),
            ],
        );
    }

    pub fn record_broadcast(&self, delivered: usize) {
        self.broadcasts.add(u64::try_from(delivered).unwrap_or(u64::MAX), &[]);
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GatewayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayMetrics").finish_non_exhaustive()
    }
}
