use thiserror::Error;

/// Errors surfaced by the public facade.
///
/// Faults that occur *inside* the processor while handling an offer (a
/// matcher returning `Err`, a matcher panicking) are never turned into
/// these — per the processor's "nothing is fatal" contract they are
/// absorbed, logged, and resolved as a rejection or a no-match instead.
/// This enum only covers the facade's own plumbing: the mailbox being gone,
/// or a caller's own construction mistakes.
#[derive(Debug, Error)]
pub enum OfferMatcherError {
    #[error("offer matcher processor has shut down")]
    FacadeClosed,

    #[error("offer matcher processor dropped the reply channel before responding")]
    ReplyChannelClosed,

    #[error("invalid offer matcher configuration: {0}")]
    InvalidConfig(String),
}
