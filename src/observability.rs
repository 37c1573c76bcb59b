use biometrics::{Collector, Counter, Moments};

pub(crate) static SEND_STARTED: Counter = Counter::new("whalechat.send.started");
pub(crate) static SEND_COMPLETED: Counter = Counter::new("whalechat.send.completed");
pub(crate) static SEND_CANCELLED: Counter = Counter::new("whalechat.send.cancelled");
pub(crate) static SEND_FAILED: Counter = Counter::new("whalechat.send.failed");
pub(crate) static SEND_REJECTED: Counter = Counter::new("whalechat.send.rejected");
pub(crate) static SEND_DURATION: Moments = Moments::new("whalechat.send.duration_seconds");

pub(crate) static STREAM_EVENTS: Counter = Counter::new("whalechat.stream.events");
pub(crate) static STREAM_BYTES: Counter = Counter::new("whalechat.stream.bytes");
pub(crate) static STREAM_SKIPPED_LINES: Counter = Counter::new("whalechat.stream.skipped_lines");
pub(crate) static STREAM_DISCARDED_EVENTS: Counter =
    Counter::new("whalechat.stream.discarded_events");
pub(crate) static STREAM_TTFB: Moments = Moments::new("whalechat.stream.ttfb_seconds");

pub(crate) static TRANSPORT_REQUESTS: Counter = Counter::new("whalechat.transport.requests");
pub(crate) static TRANSPORT_ERRORS: Counter = Counter::new("whalechat.transport.errors");
pub(crate) static TRANSPORT_RETRIES: Counter = Counter::new("whalechat.transport.retries");
pub(crate) static TRANSPORT_RETRY_BACKOFF: Moments =
    Moments::new("whalechat.transport.retry_backoff_seconds");

pub(crate) static RETRIEVAL_FALLBACKS: Counter = Counter::new("whalechat.retrieval.fallbacks");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&SEND_STARTED);
    collector.register_counter(&SEND_COMPLETED);
    collector.register_counter(&SEND_CANCELLED);
    collector.register_counter(&SEND_FAILED);
    collector.register_counter(&SEND_REJECTED);
    collector.register_moments(&SEND_DURATION);

    collector.register_counter(&STREAM_EVENTS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_counter(&STREAM_SKIPPED_LINES);
    collector.register_counter(&STREAM_DISCARDED_EVENTS);
    collector.register_moments(&STREAM_TTFB);

    collector.register_counter(&TRANSPORT_REQUESTS);
    collector.register_counter(&TRANSPORT_ERRORS);
    collector.register_counter(&TRANSPORT_RETRIES);
    collector.register_moments(&TRANSPORT_RETRY_BACKOFF);

    collector.register_counter(&RETRIEVAL_FALLBACKS);
}
