use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::errors::Result;

/// Read contract of the exchange-rate collaborator consumed by the
/// calculators.
pub trait FxServiceTrait: Send + Sync {
    /// Latest known rate of `base` in `quote` units; falls back to the
    /// configured indicative rates when no market data exists.
    fn rate(&self, base: &str, quote: &str) -> Result<Decimal>;

    /// Rate of `base` in `quote` units on the given date; errors when no
    /// rate was recorded for that date.
    fn rate_on(&self, base: &str, quote: &str, date: NaiveDate) -> Result<Decimal>;

    /// Like [`FxServiceTrait::rate_on`], degrading to the configured
    /// indicative rates instead of failing.
    fn rate_on_or_fallback(&self, base: &str, quote: &str, date: NaiveDate) -> Decimal;

    /// Converts an amount between currencies at the latest known rate.
    fn convert(&self, value: Decimal, from: &str, to: &str) -> Result<Decimal>;
}
