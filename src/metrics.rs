use tracing::trace;

// Trace-based counters; the Prometheus recorder only renders what the
// exporter collects, these feed the log pipeline.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "relay.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "relay.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn listing_outcome(success: bool) {
    trace!(
        target = "relay.metrics",
        outcome = if success { "posted" } else { "rejected" },
        "listings_total_inc"
    );
}

pub fn photo_outcome(hosted: bool) {
    trace!(
        target = "relay.metrics",
        outcome = if hosted { "hosted" } else { "failed" },
        "photos_total_inc"
    );
}
