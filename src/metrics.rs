use tracing::trace;

// Trace-based counters; the Prometheus recorder in main picks up anything
// heavier if it is ever needed.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "snaplist.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "snaplist.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn provider_attempt(provider: &str, outcome: &'static str) {
    trace!(
        target = "snaplist.metrics",
        provider = provider,
        outcome = outcome,
        "provider_attempt"
    );
}
