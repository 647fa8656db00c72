//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! With no provider installed every instrument is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("hamustro")
}

/// Counter: events accepted by the HTTP layer onto the job queue.
pub fn events_accepted() -> Counter<u64> {
    meter()
        .u64_counter("hamustro.events.accepted")
        .with_description("Events pushed onto the job queue")
        .build()
}

/// Counter: events persisted by a successful save.
pub fn events_saved() -> Counter<u64> {
    meter()
        .u64_counter("hamustro.events.saved")
        .with_description("Events persisted to storage")
        .build()
}

/// Counter: failed event actions put back on the job queue.
pub fn actions_requeued() -> Counter<u64> {
    meter()
        .u64_counter("hamustro.actions.requeued")
        .with_description("Event actions requeued after a failed save")
        .build()
}

/// Counter: event actions dropped after exhausting their retry budget.
pub fn actions_dropped() -> Counter<u64> {
    meter()
        .u64_counter("hamustro.actions.dropped")
        .with_description("Event actions dropped after the last retry")
        .build()
}

/// Counter: failed saves.
/// Labels: `mode` ("single" | "batch" | "shutdown").
pub fn saves_failed() -> Counter<u64> {
    meter()
        .u64_counter("hamustro.saves.failed")
        .with_description("Failed storage saves")
        .build()
}

/// Counter: flush actions handled by workers.
/// Labels: `trigger` ("api" | "automatic" | "shutdown").
pub fn flushes() -> Counter<u64> {
    meter()
        .u64_counter("hamustro.flushes")
        .with_description("Flush actions handled")
        .build()
}

/// Histogram: storage save duration in milliseconds.
/// Labels: `mode`.
pub fn save_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("hamustro.save.duration_ms")
        .with_description("Storage save duration in milliseconds")
        .with_unit("ms")
        .build()
}
