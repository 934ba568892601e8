//! Metric instrument factories.
//!
//! Instruments come from the `"leaseq"` meter on the globally registered
//! `MeterProvider`; without one they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("leaseq")
}

/// Counter: queue operations.
/// Labels: `queue`, `operation` ("add" | "claim" | "claim_empty" | "ping" |
/// "ack" | "nack" | "clean"), `result` ("ok" | "unknown_ack" | "error").
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("leaseq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: messages forwarded to a dead-letter queue.
/// Labels: `queue`, `dead_letter`.
pub fn dead_lettered() -> Counter<u64> {
    meter()
        .u64_counter("leaseq.queue.dead_lettered")
        .with_description("Messages forwarded to a dead-letter queue")
        .build()
}

/// Histogram: `tries` of each message at the moment it was claimed.
/// Labels: `queue`.
pub fn claim_tries() -> Histogram<u64> {
    meter()
        .u64_histogram("leaseq.queue.claim_tries")
        .with_description("Delivery attempt number observed at claim time")
        .build()
}
