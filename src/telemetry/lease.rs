//! Span helpers for lease operations.

use tracing::Span;

/// Start a span around one claim.
///
/// `message.id` and `message.tries` are declared empty and filled in by
/// [`record_claimed`] once a message is leased.
pub fn start_claim_span(queue: &str) -> Span {
    tracing::info_span!(
        "queue.claim",
        "queue.name" = queue,
        "message.id" = tracing::field::Empty,
        "message.tries" = tracing::field::Empty,
    )
}

/// Record the leased message on a claim span.
pub fn record_claimed(span: &Span, id: &str, tries: u32) {
    span.record("message.id", id);
    span.record("message.tries", tries);
}
