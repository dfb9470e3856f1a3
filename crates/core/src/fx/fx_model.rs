use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One observed market rate: `rate` units of `to_currency` per unit of
/// `from_currency`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRate {
    pub from_currency: String,
    pub to_currency: String,
    pub rate: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl ExchangeRate {
    pub fn symbol(&self) -> String {
        format!("{}{}", self.from_currency, self.to_currency)
    }
}

/// Indicative per-currency rates (in pivot-currency units) consulted when no
/// market rate is available. The numbers are configuration, not logic;
/// defaults are rough placeholders meant to be overridden from settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FxFallbackRates {
    /// Currency every cross rate is triangulated through.
    pub pivot: String,
    pub rates: HashMap<String, Decimal>,
    pub default_rate: Decimal,
}

impl Default for FxFallbackRates {
    fn default() -> Self {
        let mut rates = HashMap::new();
        rates.insert("EUR".to_string(), dec!(90));
        rates.insert("GBP".to_string(), dec!(100));
        Self {
            pivot: "RUB".to_string(),
            rates,
            default_rate: dec!(80),
        }
    }
}

impl FxFallbackRates {
    /// The configured indicative rate of `currency` in pivot units.
    pub fn rate_to_pivot(&self, currency: &str) -> Decimal {
        self.rates
            .get(&currency.to_uppercase())
            .copied()
            .unwrap_or(self.default_rate)
    }
}
