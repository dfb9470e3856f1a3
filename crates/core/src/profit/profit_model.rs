use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::broker::{Security, SecurityKind};

/// Aggregated profit figures of one security, in a caller-chosen currency.
///
/// Optional fields are absent when the underlying data does not allow the
/// figure to be derived; an absent value never means zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStatus {
    pub security: String,
    pub security_name: Option<String>,
    pub kind: SecurityKind,
    /// Reporting currency of every money figure below.
    pub currency: String,
    pub first_transaction_at: Option<DateTime<Utc>>,
    pub last_transaction_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    /// Units acquired over the window.
    pub buy_count: i64,
    /// Units disposed over the window, redemptions included.
    pub sell_count: i64,
    /// Signed net open count at the end of the window.
    pub open_count: i64,
    pub average_price: Option<Decimal>,
    pub average_accrued_interest: Option<Decimal>,
    pub last_price: Option<Decimal>,
    pub last_accrued_interest: Option<Decimal>,
    pub gross_profit: Option<Decimal>,
    pub commission: Decimal,
    pub coupon: Decimal,
    pub amortization: Decimal,
    pub dividend: Decimal,
    pub tax: Decimal,
    /// Annualized internal rate of return; `None` when not computable.
    pub internal_rate_of_return: Option<f64>,
}

impl SecurityStatus {
    pub fn new(security: &Security, currency: &str) -> Self {
        Self {
            security: security.id.clone(),
            security_name: security.name.clone(),
            kind: security.kind,
            currency: currency.to_string(),
            first_transaction_at: None,
            last_transaction_at: None,
            last_event_at: None,
            buy_count: 0,
            sell_count: 0,
            open_count: 0,
            average_price: None,
            average_accrued_interest: None,
            last_price: None,
            last_accrued_interest: None,
            gross_profit: None,
            commission: Decimal::ZERO,
            coupon: Decimal::ZERO,
            amortization: Decimal::ZERO,
            dividend: Decimal::ZERO,
            tax: Decimal::ZERO,
            internal_rate_of_return: None,
        }
    }
}
