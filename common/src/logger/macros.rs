use tracing::{Span, Level};
use super::TraceId;

/// Create a root span for a request / batch / job
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::span!(
        Level::INFO,
        name,
        trace_id = %trace_id.as_str()
    )
}

/// Create a child span (inherits trace_id automatically)
pub fn child_span(name: &'static str) -> Span {
    tracing::span!(Level::INFO, name)
}

/// Create a span correlated by a caller-supplied id rather than a minted
/// `TraceId` — for subsystems whose natural correlation id already exists
/// (an offer id, a request id) and shouldn't be wrapped in a second one.
pub fn correlated_span(name: &'static str, offer_id: &str) -> Span {
    tracing::span!(
        Level::INFO,
        name,
        offer_id = %offer_id
    )
}
