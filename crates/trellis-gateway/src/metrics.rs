//! Prometheus metrics for the gateway edge.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, Counter, CounterVec, Encoder, TextEncoder,
};

lazy_static! {
    /// Requests seen by the edge dispatcher, by method and response status.
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "trellis_requests_total",
        "Total number of requests processed by the gateway",
        &["method", "status"]
    )
    .unwrap();

    /// Matching outcomes, by verdict kind.
    pub static ref VERDICTS_TOTAL: CounterVec = register_counter_vec!(
        "trellis_verdicts_total",
        "Matching outcomes produced by the mux",
        &["verdict"]
    )
    .unwrap();

    /// Successful hot reloads of the rule table.
    pub static ref RELOADS_TOTAL: Counter = register_counter!(
        "trellis_mux_reloads_total",
        "Number of mux reloads since start"
    )
    .unwrap();
}

pub fn record_request(method: &str, status: u16) {
    REQUESTS_TOTAL
        .with_label_values(&[method, &status.to_string()])
        .inc();
}

pub fn record_verdict(verdict: &str) {
    VERDICTS_TOTAL.with_label_values(&[verdict]).inc();
}

pub fn record_reload() {
    RELOADS_TOTAL.inc();
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
