//! Metrics declaration and recording.
//!
//! Metric names are registered lazily on first use. Without the `metrics`
//! feature every recorder below compiles to nothing.

use std::time::Duration;

use crate::config::Mode;
use crate::response::ResponseSource;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Track number of transport attempts started.
    pub static ref TRANSPORT_SENDS: &'static str = {
        metrics::describe_counter!(
            "callbox_transport_sends_total",
            "Total number of transport attempts started."
        );
        "callbox_transport_sends_total"
    };
    /// Histogram of transport attempt duration.
    pub static ref TRANSPORT_DURATION: &'static str = {
        metrics::describe_histogram!(
            "callbox_transport_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of transport attempts in seconds."
        );
        "callbox_transport_duration_seconds"
    };
    /// Track number of re-sends scheduled after failed attempts.
    pub static ref RETRIES: &'static str = {
        metrics::describe_counter!(
            "callbox_retries_total",
            "Total number of re-sends scheduled after failed attempts."
        );
        "callbox_retries_total"
    };
    /// Track number of calls dropped by debounce or throttle.
    pub static ref GATE_DROPS: &'static str = {
        metrics::describe_counter!(
            "callbox_gate_drops_total",
            "Total number of calls dropped by the rate gate."
        );
        "callbox_gate_drops_total"
    };
    /// Track number of outcomes delivered to calls.
    pub static ref DELIVERIES: &'static str = {
        metrics::describe_counter!(
            "callbox_deliveries_total",
            "Total number of outcomes delivered to calls."
        );
        "callbox_deliveries_total"
    };
}

#[inline]
pub(crate) fn transport_send(elapsed: Duration) {
    #[cfg(feature = "metrics")]
    {
        metrics::counter!(*TRANSPORT_SENDS).increment(1);
        metrics::histogram!(*TRANSPORT_DURATION).record(elapsed.as_secs_f64());
    }
    #[cfg(not(feature = "metrics"))]
    let _ = elapsed;
}

#[inline]
pub(crate) fn retry() {
    #[cfg(feature = "metrics")]
    metrics::counter!(*RETRIES).increment(1);
}

#[inline]
pub(crate) fn gate_drop(mode: Mode) {
    #[cfg(feature = "metrics")]
    metrics::counter!(*GATE_DROPS, "mode" => mode.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = mode;
}

#[inline]
pub(crate) fn delivery(source: ResponseSource, success: bool) {
    #[cfg(feature = "metrics")]
    metrics::counter!(
        *DELIVERIES,
        "source" => source.as_str(),
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = (source, success);
}
