use chrono::NaiveDate;
use dashmap::DashMap;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::{BTreeMap, HashMap};

use crate::constants::EXCHANGE_RATE_PRECISION;
use crate::errors::Result;
use crate::fx::fx_errors::FxError;
use crate::fx::fx_model::{ExchangeRate, FxFallbackRates};
use crate::fx::fx_traits::FxServiceTrait;

/// Rate table with cached cross rates and configured fallbacks.
///
/// Market data arrives as `<currency>/<pivot>` observations; every cross rate
/// is triangulated through the pivot currency. When a leg has no market rate
/// the configured indicative rate is used so that a missing quote degrades a
/// figure instead of aborting the whole computation.
pub struct CurrencyConverter {
    // currency -> latest rate in pivot units
    latest_to_pivot: HashMap<String, Decimal>,
    // currency -> date -> rate in pivot units
    daily_to_pivot: HashMap<String, BTreeMap<NaiveDate, Decimal>>,
    fallback: FxFallbackRates,
    // (base, quote) -> derived cross rate
    cross_cache: DashMap<(String, String), Decimal>,
    // (base, quote, date) -> derived cross rate
    cross_cache_by_date: DashMap<(String, String, NaiveDate), Decimal>,
}

impl CurrencyConverter {
    /// Builds the table from observed rates. Observations not involving the
    /// pivot currency are ignored; inverted observations (pivot as base) are
    /// flipped. Zero rates are dropped.
    pub fn new(rates: Vec<ExchangeRate>, fallback: FxFallbackRates) -> Self {
        let mut latest_to_pivot: HashMap<String, (Decimal, chrono::DateTime<chrono::Utc>)> =
            HashMap::new();
        let mut daily_to_pivot: HashMap<String, BTreeMap<NaiveDate, Decimal>> = HashMap::new();

        for rate in rates {
            if rate.rate.is_zero() {
                log::error!(
                    "Zero exchange rate for {}/{} at {}, dropping",
                    rate.from_currency,
                    rate.to_currency,
                    rate.timestamp
                );
                continue;
            }
            let (currency, to_pivot) =
                if rate.to_currency.eq_ignore_ascii_case(&fallback.pivot) {
                    (rate.from_currency.to_uppercase(), rate.rate)
                } else if rate.from_currency.eq_ignore_ascii_case(&fallback.pivot) {
                    (
                        rate.to_currency.to_uppercase(),
                        (Decimal::ONE / rate.rate).round_dp_with_strategy(
                            EXCHANGE_RATE_PRECISION,
                            RoundingStrategy::MidpointAwayFromZero,
                        ),
                    )
                } else {
                    log::warn!(
                        "Ignoring rate {}/{}: neither side is the pivot currency {}",
                        rate.from_currency,
                        rate.to_currency,
                        fallback.pivot
                    );
                    continue;
                };

            daily_to_pivot
                .entry(currency.clone())
                .or_default()
                .insert(rate.timestamp.date_naive(), to_pivot);
            match latest_to_pivot.entry(currency) {
                std::collections::hash_map::Entry::Occupied(mut entry) => {
                    if rate.timestamp > entry.get().1 {
                        *entry.get_mut() = (to_pivot, rate.timestamp);
                    }
                }
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert((to_pivot, rate.timestamp));
                }
            }
        }

        Self {
            latest_to_pivot: latest_to_pivot
                .into_iter()
                .map(|(currency, (rate, _))| (currency, rate))
                .collect(),
            daily_to_pivot,
            fallback,
            cross_cache: DashMap::new(),
            cross_cache_by_date: DashMap::new(),
        }
    }

    pub fn with_default_fallbacks(rates: Vec<ExchangeRate>) -> Self {
        Self::new(rates, FxFallbackRates::default())
    }

    /// Drops derived cross rates; call after replacing market data.
    pub fn invalidate_cache(&self) {
        self.cross_cache.clear();
        self.cross_cache_by_date.clear();
    }

    /// Latest rate of `currency` in pivot units, degrading to the configured
    /// indicative rate.
    fn latest_rate_to_pivot(&self, currency: &str) -> Decimal {
        if currency.eq_ignore_ascii_case(&self.fallback.pivot) {
            return Decimal::ONE;
        }
        match self.latest_to_pivot.get(&currency.to_uppercase()) {
            Some(rate) => *rate,
            None => {
                let fallback = self.fallback.rate_to_pivot(currency);
                log::debug!(
                    "No market rate for {}{}, using indicative value {}",
                    currency.to_uppercase(),
                    self.fallback.pivot,
                    fallback
                );
                fallback
            }
        }
    }

    /// Rate of `currency` in pivot units on the exact date.
    fn to_pivot_on(&self, currency: &str, date: NaiveDate) -> Result<Decimal> {
        if currency.eq_ignore_ascii_case(&self.fallback.pivot) {
            return Ok(Decimal::ONE);
        }
        self.daily_to_pivot
            .get(&currency.to_uppercase())
            .and_then(|by_date| by_date.get(&date))
            .copied()
            .ok_or_else(|| {
                FxError::RateNotFound(format!(
                    "no {}{} rate recorded for {}",
                    currency.to_uppercase(),
                    self.fallback.pivot,
                    date
                ))
                .into()
            })
    }

    fn cross_rate(&self, base_to_pivot: Decimal, quote_to_pivot: Decimal) -> Result<Decimal> {
        if quote_to_pivot.is_zero() {
            return Err(FxError::InvalidRate("zero quote-currency rate".to_string()).into());
        }
        Ok((base_to_pivot / quote_to_pivot).round_dp_with_strategy(
            EXCHANGE_RATE_PRECISION,
            RoundingStrategy::MidpointAwayFromZero,
        ))
    }
}

impl FxServiceTrait for CurrencyConverter {
    fn rate(&self, base: &str, quote: &str) -> Result<Decimal> {
        if base.eq_ignore_ascii_case(quote) {
            return Ok(Decimal::ONE);
        }
        let key = (base.to_uppercase(), quote.to_uppercase());
        if let Some(cached) = self.cross_cache.get(&key) {
            return Ok(*cached);
        }
        let rate =
            self.cross_rate(self.latest_rate_to_pivot(base), self.latest_rate_to_pivot(quote))?;
        self.cross_cache.insert(key, rate);
        Ok(rate)
    }

    fn rate_on(&self, base: &str, quote: &str, date: NaiveDate) -> Result<Decimal> {
        if base.eq_ignore_ascii_case(quote) {
            return Ok(Decimal::ONE);
        }
        let key = (base.to_uppercase(), quote.to_uppercase(), date);
        if let Some(cached) = self.cross_cache_by_date.get(&key) {
            return Ok(*cached);
        }
        let rate = self.cross_rate(self.to_pivot_on(base, date)?, self.to_pivot_on(quote, date)?)?;
        self.cross_cache_by_date.insert(key, rate);
        Ok(rate)
    }

    fn rate_on_or_fallback(&self, base: &str, quote: &str, date: NaiveDate) -> Decimal {
        match self.rate_on(base, quote, date) {
            Ok(rate) => rate,
            Err(_) => {
                let base_leg = self
                    .to_pivot_on(base, date)
                    .unwrap_or_else(|_| self.fallback.rate_to_pivot(base));
                let quote_leg = self
                    .to_pivot_on(quote, date)
                    .unwrap_or_else(|_| self.fallback.rate_to_pivot(quote));
                let rate = self
                    .cross_rate(base_leg, quote_leg)
                    .unwrap_or(Decimal::ONE);
                log::warn!(
                    "Rate {}{} unknown for {}, using indicative value {}",
                    base.to_uppercase(),
                    quote.to_uppercase(),
                    date,
                    rate
                );
                rate
            }
        }
    }

    fn convert(&self, value: Decimal, from: &str, to: &str) -> Result<Decimal> {
        if from.eq_ignore_ascii_case(to) {
            return Ok(value);
        }
        let rate = self.rate(from, to)?;
        Ok(value * rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn observed(from: &str, rate: Decimal, day: u32) -> ExchangeRate {
        ExchangeRate {
            from_currency: from.to_string(),
            to_currency: "RUB".to_string(),
            rate,
            timestamp: Utc.with_ymd_and_hms(2023, 10, day, 15, 0, 0).unwrap(),
        }
    }

    fn converter() -> CurrencyConverter {
        CurrencyConverter::with_default_fallbacks(vec![
            observed("USD", dec!(60), 26),
            observed("USD", dec!(62), 27),
            observed("EUR", dec!(66), 26),
        ])
    }

    #[test]
    fn test_same_currency_is_identity() {
        let converter = converter();
        assert_eq!(converter.rate("USD", "usd").unwrap(), dec!(1));
        assert_eq!(
            converter.convert(dec!(42), "RUB", "RUB").unwrap(),
            dec!(42)
        );
    }

    #[test]
    fn test_latest_rate_to_pivot() {
        let converter = converter();
        assert_eq!(converter.rate("USD", "RUB").unwrap(), dec!(62));
        assert_eq!(
            converter.convert(dec!(10), "USD", "RUB").unwrap(),
            dec!(620)
        );
    }

    #[test]
    fn test_pivot_to_currency_is_inverted() {
        let converter = converter();
        let rate = converter.rate("RUB", "USD").unwrap();
        assert_eq!(rate, (dec!(1) / dec!(62)).round_dp(6));
    }

    #[test]
    fn test_cross_rate_triangulates_through_pivot() {
        let converter = converter();
        // EUR/USD = 66 / 62
        assert_eq!(
            converter.rate("EUR", "USD").unwrap(),
            (dec!(66) / dec!(62)).round_dp(6)
        );
    }

    #[test]
    fn test_rate_on_exact_date() {
        let converter = converter();
        let date = NaiveDate::from_ymd_opt(2023, 10, 26).unwrap();
        assert_eq!(converter.rate_on("USD", "RUB", date).unwrap(), dec!(60));

        let unknown = NaiveDate::from_ymd_opt(2023, 10, 1).unwrap();
        assert!(converter.rate_on("USD", "RUB", unknown).is_err());
    }

    #[test]
    fn test_missing_rate_falls_back_to_configuration() {
        let converter = converter();
        // GBP has no market data; the configured placeholder is 100
        assert_eq!(converter.rate("GBP", "RUB").unwrap(), dec!(100));

        let date = NaiveDate::from_ymd_opt(2023, 10, 1).unwrap();
        assert_eq!(
            converter.rate_on_or_fallback("GBP", "RUB", date),
            dec!(100)
        );
    }

    #[test]
    fn test_inverted_observation_is_flipped() {
        let converter = CurrencyConverter::with_default_fallbacks(vec![ExchangeRate {
            from_currency: "RUB".to_string(),
            to_currency: "USD".to_string(),
            rate: dec!(0.0125),
            timestamp: Utc.with_ymd_and_hms(2023, 10, 26, 15, 0, 0).unwrap(),
        }]);
        assert_eq!(converter.rate("USD", "RUB").unwrap(), dec!(80));
    }
}
