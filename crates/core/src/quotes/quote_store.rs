use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::quotes::quote_model::SecurityQuote;
use crate::quotes::quote_traits::QuoteSourceTrait;

/// Quote source over already-loaded quotes, kept sorted per security.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQuoteStore {
    by_security: HashMap<String, Vec<SecurityQuote>>,
}

impl InMemoryQuoteStore {
    pub fn new(quotes: Vec<SecurityQuote>) -> Self {
        let mut by_security: HashMap<String, Vec<SecurityQuote>> = HashMap::new();
        for quote in quotes {
            by_security.entry(quote.security.clone()).or_default().push(quote);
        }
        for quotes in by_security.values_mut() {
            quotes.sort_by_key(|quote| quote.timestamp);
        }
        Self { by_security }
    }

    pub fn is_empty(&self) -> bool {
        self.by_security.is_empty()
    }
}

impl QuoteSourceTrait for InMemoryQuoteStore {
    fn latest_quote_before(&self, security: &str, instant: DateTime<Utc>) -> Option<SecurityQuote> {
        self.by_security.get(security).and_then(|quotes| {
            quotes
                .iter()
                .rev()
                .find(|quote| quote.timestamp < instant)
                .cloned()
        })
    }
}
