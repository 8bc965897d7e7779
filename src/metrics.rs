use tracing::trace;

// Trace-based counters; the Prometheus recorder only renders what is
// registered, so these stay as structured events.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "stylist.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn inc_failures(route: &'static str, kind: &'static str) {
    trace!(
        target = "stylist.metrics",
        route = route,
        kind = kind,
        "failures_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "stylist.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}
