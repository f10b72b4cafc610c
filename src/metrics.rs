//! Prometheus metrics for the dispatcher.
//!
//! - `livesync_dispatch_total{kind}` - Dispatch operations by kind
//! - `livesync_dispatch_fanout` - Per-user receivers invoked per dispatch (histogram)
//! - `livesync_registered_receivers` - Installed per-user receivers (gauge)
//! - `livesync_dispatch_errors_total{code}` - Dispatcher errors by error code
//!
//! Recording helpers are no-ops until [`init`] has run.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Dispatch operations by kind (event, initial_state, ephemeral, receipt, invalidate).
pub static DISPATCH_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();

/// Recipients per dispatch.
pub static DISPATCH_FANOUT: OnceLock<Histogram> = OnceLock::new();

/// Currently registered per-user receivers.
pub static REGISTERED_RECEIVERS: OnceLock<IntGauge> = OnceLock::new();

/// Errors returned by the dispatcher, labeled by `error_code()`.
pub static DISPATCH_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            if $metric.get().is_none() {
                let m = $init.expect(concat!(stringify!($metric), " creation failed"));
                if let Err(e) = r.register(Box::new(m.clone())) {
                    tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                }
                let _ = $metric.set(m);
            }
        };
    }

    register!(DISPATCH_COUNTER, IntCounterVec::new(Opts::new("livesync_dispatch_total", "Dispatch operations by kind"), &["kind"]));
    register!(DISPATCH_FANOUT, Histogram::with_opts(
        HistogramOpts::new("livesync_dispatch_fanout", "Per-user receivers invoked per dispatch")
            .buckets(vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0])));
    register!(REGISTERED_RECEIVERS, IntGauge::new("livesync_registered_receivers", "Registered per-user receivers"));
    register!(DISPATCH_ERRORS, IntCounterVec::new(Opts::new("livesync_dispatch_errors_total", "Dispatcher errors by code"), &["code"]));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
        String::new()
    })
}

/// Record one dispatch operation and how many per-user receivers it reached.
#[inline]
pub fn record_dispatch(kind: &str, recipients: usize) {
    if let Some(c) = DISPATCH_COUNTER.get() {
        c.with_label_values(&[kind]).inc();
    }
    if let Some(h) = DISPATCH_FANOUT.get() {
        h.observe(recipients as f64);
    }
}

#[inline]
pub fn set_registered_receivers(count: usize) {
    if let Some(g) = REGISTERED_RECEIVERS.get() {
        g.set(count as i64);
    }
}

/// Count one dispatcher error under its static code.
#[inline]
pub fn record_error(code: &str) {
    if let Some(c) = DISPATCH_ERRORS.get() {
        c.with_label_values(&[code]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_lifecycle() {
        init();
        init();

        record_dispatch("event", 3);
        set_registered_receivers(2);
        record_error("no_global_receiver");

        let output = gather_metrics();
        assert!(output.contains("livesync_dispatch_total"));
        assert!(output.contains("livesync_registered_receivers"));
        assert!(output.contains(r#"livesync_dispatch_errors_total{code="no_global_receiver"}"#));
    }
}
