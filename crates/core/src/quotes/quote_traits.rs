use chrono::{DateTime, Utc};

use crate::quotes::quote_model::SecurityQuote;

/// Read contract of the quote store consumed by the profit calculator.
pub trait QuoteSourceTrait: Send + Sync {
    /// The latest quote of `security` strictly before `instant`, if any.
    fn latest_quote_before(&self, security: &str, instant: DateTime<Utc>) -> Option<SecurityQuote>;
}
