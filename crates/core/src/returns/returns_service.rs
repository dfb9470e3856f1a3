use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::broker::{CashFlowKind, EventKind, PositionsFilter, SecurityKind, SecurityLedger};
use crate::errors::{Error, Result};
use crate::fx::FxServiceTrait;
use crate::positions::Positions;
use crate::quotes::SecurityQuote;
use crate::returns::xirr::{xirr, CashFlow};

/// Event kinds that enter the rate-of-return cash-flow series.
const PAYMENT_KINDS: [EventKind; 5] = [
    EventKind::Dividend,
    EventKind::Coupon,
    EventKind::Amortization,
    EventKind::Redemption,
    EventKind::Tax,
];

/// Derives the annualized internal rate of return of one security's
/// investments.
///
/// Derivatives are never evaluated: the margin/collateral actually invested
/// is not tracked, so a rate would be meaningless.
pub struct ReturnsService {
    fx: Arc<dyn FxServiceTrait>,
}

impl ReturnsService {
    /// Accepted |NPV| residual, in currency units.
    pub const NPV_TOLERANCE: f64 = 0.001;

    pub fn new(fx: Arc<dyn FxServiceTrait>) -> Self {
        Self { fx }
    }

    /// The annualized return, or `None` when it cannot be computed. Never
    /// fails: missing data and solver divergence degrade to `None` with a
    /// debug log.
    ///
    /// `quote` may be `None` only when the current open count is zero.
    pub fn internal_rate_of_return(
        &self,
        ledger: &SecurityLedger,
        positions: &Positions,
        quote: Option<&SecurityQuote>,
        filter: &PositionsFilter,
    ) -> Option<f64> {
        if ledger.security.kind == SecurityKind::Derivative {
            return None;
        }
        let count = positions.current_open_count();
        let dirty_price = quote.and_then(SecurityQuote::dirty_price_in_currency);
        if count != 0 && dirty_price.is_none() {
            return None;
        }

        match self.cash_flow_series(ledger, positions, quote, dirty_price, filter) {
            Ok(flows) => xirr(&flows, Self::NPV_TOLERANCE),
            Err(error) => {
                log::debug!(
                    "rate of return not computable for {}: {}",
                    ledger.security.id,
                    error
                );
                None
            }
        }
    }

    fn cash_flow_series(
        &self,
        ledger: &SecurityLedger,
        positions: &Positions,
        quote: Option<&SecurityQuote>,
        dirty_price: Option<Decimal>,
        filter: &PositionsFilter,
    ) -> Result<Vec<CashFlow>> {
        let to_currency = self.transaction_currency(ledger, positions)?;
        let mut flows = Vec::new();

        for transaction in positions.transactions() {
            let Some(id) = transaction.id else {
                continue; // deposits/withdrawals and synthetic closures carry no money
            };
            let Some(price) = ledger.cash_flows.get(id, CashFlowKind::Price) else {
                continue;
            };
            let mut amount = price.value;
            if let Some(commission) = ledger.cash_flows.get(id, CashFlowKind::Commission) {
                // a commission settled in another currency is ignored here
                if commission.currency == price.currency {
                    amount += commission.value;
                }
            }
            if amount.is_zero() {
                continue;
            }
            let converted = self.fx.convert(amount, &price.currency, &to_currency)?;
            flows.push(CashFlow::new(
                to_f64(converted)?,
                transaction.timestamp.date_naive(),
            ));
        }

        for event in &ledger.events {
            if PAYMENT_KINDS.contains(&event.kind) && filter.matches_event(event) {
                let converted = self.fx.convert(event.value, &event.currency, &to_currency)?;
                flows.push(CashFlow::new(
                    to_f64(converted)?,
                    event.timestamp.date_naive(),
                ));
            }
        }

        let count = positions.current_open_count();
        if count != 0 {
            if let (Some(quote), Some(dirty_price)) = (quote, dirty_price) {
                let quote_currency = quote.currency.as_deref().unwrap_or(&to_currency);
                let per_unit = self.fx.convert(dirty_price, quote_currency, &to_currency)?;
                flows.push(CashFlow::new(
                    to_f64(Decimal::from(count) * per_unit)?,
                    quote.timestamp.date_naive(),
                ));
            }
        }

        Ok(flows)
    }

    /// The price currency of any transaction in the set; the series is built
    /// in that currency.
    fn transaction_currency(
        &self,
        ledger: &SecurityLedger,
        positions: &Positions,
    ) -> Result<String> {
        positions
            .transactions()
            .iter()
            .filter_map(|transaction| transaction.id)
            .filter_map(|id| ledger.cash_flows.get(id, CashFlowKind::Price))
            .map(|flow| flow.currency.clone())
            .next()
            .ok_or_else(|| {
                Error::Unexpected("no transaction payment currency found".to_string())
            })
    }
}

fn to_f64(value: Decimal) -> Result<f64> {
    value
        .to_f64()
        .ok_or_else(|| Error::Calculation(format!("cannot represent {} as f64", value)))
}
