use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A market quote of one security at one instant.
///
/// `quote` is the raw quotation in instrument units (points, percent of face
/// value, ...); `price` is the clean price in `currency`. `currency` may be
/// absent when the quote source does not record it; consumers default it to
/// the trade currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityQuote {
    pub security: String,
    pub timestamp: DateTime<Utc>,
    pub quote: Decimal,
    pub price: Option<Decimal>,
    pub accrued_interest: Option<Decimal>,
    pub currency: Option<String>,
}

impl SecurityQuote {
    /// Clean price per unit in `currency`, when the quote carries one.
    pub fn clean_price_in_currency(&self) -> Option<Decimal> {
        self.price
    }

    /// Dirty price per unit in `currency`: the clean price plus accrued
    /// interest for bonds.
    pub fn dirty_price_in_currency(&self) -> Option<Decimal> {
        self.price
            .map(|price| price + self.accrued_interest.unwrap_or(Decimal::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn quote(price: Option<Decimal>, accrued: Option<Decimal>) -> SecurityQuote {
        SecurityQuote {
            security: "XS0000000001".to_string(),
            timestamp: Utc.with_ymd_and_hms(2023, 5, 10, 18, 45, 0).unwrap(),
            quote: dec!(99.5),
            price,
            accrued_interest: accrued,
            currency: Some("RUB".to_string()),
        }
    }

    #[test]
    fn test_dirty_price() {
        assert_eq!(
            quote(Some(dec!(995)), Some(dec!(12.4))).dirty_price_in_currency(),
            Some(dec!(1007.4))
        );
        assert_eq!(
            quote(Some(dec!(995)), None).dirty_price_in_currency(),
            Some(dec!(995))
        );
        assert_eq!(quote(None, Some(dec!(12.4))).dirty_price_in_currency(), None);
    }
}
