use thiserror::Error;

/// Contract violations in the matching engine.
///
/// These indicate inconsistent source data or a programming error; the
/// matcher fails fast instead of clamping counts.
#[derive(Error, Debug)]
pub enum MatchingError {
    #[error("cannot close {count} units of a lot holding only {unclosed} unclosed units")]
    OverClose { count: i64, unclosed: i64 },

    #[error("closing count {count} has the same sign as the lot's {unclosed} unclosed units")]
    SameSignClose { count: i64, unclosed: i64 },

    #[error("closing count must be non-zero")]
    ZeroClose,

    #[error("expected a redemption event, got a {0} event")]
    UnexpectedEventKind(String),
}
