//! Worker span helpers.

use tracing::Span;

/// Span covering one worker's lifetime. `worker.last_batch` is filled in by
/// [`record_save`].
pub fn start_worker_span(worker_id: usize, buffered: bool) -> Span {
    tracing::info_span!(
        "worker.run",
        "worker.id" = worker_id,
        "worker.buffered" = buffered,
        "worker.last_batch" = tracing::field::Empty,
    )
}

/// Record one save attempt on the worker span.
pub fn record_save(span: &Span, records: usize, ok: bool) {
    if ok {
        span.record("worker.last_batch", records);
    }
    span.in_scope(|| {
        tracing::debug!(records, ok, "save");
    });
}
