use chrono::Utc;
use rayon::prelude::*;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;

use crate::broker::{
    currency_pair_of, pair_currencies, CashFlowKind, EventKind, PositionsFilter, Security,
    SecurityEventCashFlow, SecurityKind, SecurityLedger, Transaction, TransactionCashFlowIndex,
};
use crate::constants::DECIMAL_PRECISION;
use crate::errors::Result;
use crate::fx::{FxError, FxServiceTrait};
use crate::positions::{
    merge_contract_streams, ClosedPosition, ClosingEvent, Positions, PositionsCache, PositionsKey,
};
use crate::profit::profit_model::SecurityStatus;
use crate::quotes::{QuoteSourceTrait, SecurityQuote};
use crate::returns::ReturnsService;

/// Event kinds counted as payments when looking for the latest activity.
const PAYMENT_EVENT_KINDS: [EventKind; 5] = [
    EventKind::Amortization,
    EventKind::Redemption,
    EventKind::Coupon,
    EventKind::Dividend,
    EventKind::DerivativeProfit,
];

/// Derives cost basis, payment sums, valuation and return figures per
/// security from matched positions.
///
/// Pure over its inputs apart from the shared positions cache; independent
/// securities can be computed in parallel.
pub struct ProfitService {
    fx: Arc<dyn FxServiceTrait>,
    quotes: Arc<dyn QuoteSourceTrait>,
    positions_cache: Arc<PositionsCache>,
    returns: ReturnsService,
}

impl ProfitService {
    pub fn new(
        fx: Arc<dyn FxServiceTrait>,
        quotes: Arc<dyn QuoteSourceTrait>,
        positions_cache: Arc<PositionsCache>,
    ) -> Self {
        let returns = ReturnsService::new(Arc::clone(&fx));
        Self {
            fx,
            quotes,
            positions_cache,
            returns,
        }
    }

    /// Matched positions for the ledger, shared through the cache.
    ///
    /// Currency pairs are keyed by their pair group and their per-contract
    /// streams merged before matching; redemptions only apply to stock/bond
    /// securities.
    pub fn positions(
        &self,
        ledger: &SecurityLedger,
        filter: &PositionsFilter,
    ) -> Result<Arc<Positions>> {
        let instrument = match ledger.security.kind {
            SecurityKind::CurrencyPair => currency_pair_of(&ledger.security.id).to_string(),
            _ => ledger.security.id.clone(),
        };
        let key = PositionsKey::new(filter.portfolios.clone(), instrument, filter.window);
        self.positions_cache.get_or_compute(key, || {
            let transactions: Vec<Transaction> = ledger
                .transactions
                .iter()
                .filter(|transaction| filter.matches_transaction(transaction))
                .cloned()
                .collect();
            let transactions = match ledger.security.kind {
                SecurityKind::CurrencyPair => merge_contract_streams([transactions]),
                _ => transactions,
            };
            let redemptions: Vec<SecurityEventCashFlow> = match ledger.security.kind {
                SecurityKind::StockOrBond => ledger
                    .events
                    .iter()
                    .filter(|event| {
                        event.kind == EventKind::Redemption && filter.matches_event(event)
                    })
                    .cloned()
                    .collect(),
                _ => Vec::new(),
            };
            Positions::new(transactions, redemptions).map_err(Into::into)
        })
    }

    /// Gross profit of buying and selling; for derivatives the accumulated
    /// variation margin.
    pub fn gross_profit(
        &self,
        ledger: &SecurityLedger,
        positions: &Positions,
        filter: &PositionsFilter,
        to_currency: &str,
    ) -> Result<Decimal> {
        match ledger.security.kind {
            SecurityKind::StockOrBond => Ok(self.purchase_cost(ledger, positions, to_currency)?
                + self.purchase_accrued_interest(ledger, positions, to_currency)?),
            SecurityKind::Derivative => self.sum_payments(
                &ledger.events,
                EventKind::DerivativeProfit,
                filter,
                to_currency,
            ),
            SecurityKind::CurrencyPair => self.purchase_cost(ledger, positions, to_currency),
        }
    }

    /// Sale proceeds minus acquisition spend over the matched positions.
    pub fn purchase_cost(
        &self,
        ledger: &SecurityLedger,
        positions: &Positions,
        to_currency: &str,
    ) -> Result<Decimal> {
        match ledger.security.kind {
            SecurityKind::StockOrBond => {
                self.stock_or_bond_purchase_cost(positions, &ledger.cash_flows, to_currency)
            }
            SecurityKind::Derivative => self.total(
                positions.transactions(),
                &ledger.cash_flows,
                CashFlowKind::DerivativePrice,
                to_currency,
            ),
            SecurityKind::CurrencyPair => self.total(
                positions.transactions(),
                &ledger.cash_flows,
                CashFlowKind::Price,
                to_currency,
            ),
        }
    }

    /// Sold minus bought accrued interest; zero for everything but bonds.
    pub fn purchase_accrued_interest(
        &self,
        ledger: &SecurityLedger,
        positions: &Positions,
        to_currency: &str,
    ) -> Result<Decimal> {
        if ledger.security.kind == SecurityKind::StockOrBond {
            return self.total(
                positions.transactions(),
                &ledger.cash_flows,
                CashFlowKind::AccruedInterest,
                to_currency,
            );
        }
        Ok(Decimal::ZERO)
    }

    fn stock_or_bond_purchase_cost(
        &self,
        positions: &Positions,
        cash_flows: &TransactionCashFlowIndex,
        to_currency: &str,
    ) -> Result<Decimal> {
        let mut cost = Decimal::ZERO;
        for lot in positions.opened() {
            if let Some(value) = self.transaction_flow_value(
                lot.open_transaction(),
                cash_flows,
                CashFlowKind::Price,
                to_currency,
            )? {
                cost += value * amount_multiplier(lot.unclosed(), lot.open_transaction().count);
            }
        }
        for closed in positions.closed() {
            cost += self.closed_position_cost(closed, cash_flows, to_currency)?;
        }
        for redemption in positions.redemptions() {
            cost += self
                .fx
                .convert(redemption.value, &redemption.currency, to_currency)?
                .abs();
        }
        Ok(cost)
    }

    /// Cost-basis contribution of one matched pair, total over the closing
    /// event. Redemption proceeds are accounted from the redemption event,
    /// and a split leg moves shares without moving money.
    fn closed_position_cost(
        &self,
        closed: &ClosedPosition,
        cash_flows: &TransactionCashFlowIndex,
        to_currency: &str,
    ) -> Result<Decimal> {
        let open_part = self
            .transaction_flow_value(
                closed.open_transaction(),
                cash_flows,
                CashFlowKind::Price,
                to_currency,
            )?
            .map(|value| {
                value * amount_multiplier(closed.count(), closed.open_transaction().count)
            });
        match closed.closing_event() {
            ClosingEvent::Sale => {
                let close_part = self
                    .transaction_flow_value(
                        closed.close_transaction(),
                        cash_flows,
                        CashFlowKind::Price,
                        to_currency,
                    )?
                    .map(|value| {
                        value * amount_multiplier(closed.count(), closed.close_transaction().count)
                    });
                match close_part {
                    Some(close_part) => Ok(open_part.unwrap_or_default() + close_part),
                    // the asset left the account without a matching sale
                    None => Ok(open_part.unwrap_or_default()),
                }
            }
            ClosingEvent::Redemption => Ok(open_part.unwrap_or_default()),
            ClosingEvent::SplitLeg => Ok(Decimal::ZERO),
        }
    }

    /// Sums one cash-flow kind across transactions that have both an id and
    /// a non-zero count, converting each flow from its own currency.
    pub fn total(
        &self,
        transactions: &[Transaction],
        cash_flows: &TransactionCashFlowIndex,
        kind: CashFlowKind,
        to_currency: &str,
    ) -> Result<Decimal> {
        let mut sum = Decimal::ZERO;
        for transaction in transactions {
            if transaction.id.is_none() || transaction.count == 0 {
                continue;
            }
            if let Some(value) =
                self.transaction_flow_value(transaction, cash_flows, kind, to_currency)?
            {
                sum += value;
            }
        }
        Ok(sum)
    }

    /// Sums events of one kind within the filter, keeping the recorded sign.
    pub fn sum_payments(
        &self,
        events: &[SecurityEventCashFlow],
        kind: EventKind,
        filter: &PositionsFilter,
        to_currency: &str,
    ) -> Result<Decimal> {
        let mut sum = Decimal::ZERO;
        for event in events {
            if event.kind == kind && filter.matches_event(event) {
                sum += self.fx.convert(event.value, &event.currency, to_currency)?;
            }
        }
        Ok(sum)
    }

    /// The quote valuing the current open position as of the window end.
    ///
    /// Currency pairs are valued from the exchange-rate table (historical
    /// when the window ends in the past, latest otherwise); other securities
    /// from the latest stored quote strictly before the window end, its
    /// currency defaulting to the trade currency.
    pub fn resolve_current_quote(
        &self,
        security: &Security,
        filter: &PositionsFilter,
        trade_currency: &str,
    ) -> Result<Option<SecurityQuote>> {
        match security.kind {
            SecurityKind::CurrencyPair => {
                let pair = currency_pair_of(&security.id);
                let (base, quote_currency) = pair_currencies(pair)
                    .ok_or_else(|| FxError::InvalidCurrencyPair(pair.to_string()))?;
                let as_of = filter.window.to.date_naive();
                let rate = if as_of >= Utc::now().date_naive() {
                    self.fx.rate(base, quote_currency)?
                } else {
                    self.fx.rate_on_or_fallback(base, quote_currency, as_of)
                };
                Ok(Some(SecurityQuote {
                    security: security.id.clone(),
                    timestamp: filter.window.to,
                    quote: rate,
                    price: Some(rate),
                    accrued_interest: None,
                    currency: Some(quote_currency.to_string()),
                }))
            }
            _ => Ok(self
                .quotes
                .latest_quote_before(&security.id, filter.window.to)
                .map(|mut quote| {
                    if quote.currency.is_none() {
                        quote.currency = Some(trade_currency.to_string());
                    }
                    quote
                })),
        }
    }

    /// Approximate per-unit valuation from the most recent priced
    /// transaction, for securities without any stored quote. `None` when the
    /// derived value is exactly zero.
    pub fn last_transaction_valuation(
        &self,
        ledger: &SecurityLedger,
        to_currency: &str,
    ) -> Result<Option<Decimal>> {
        for transaction in ledger.transactions.iter().rev() {
            let Some(id) = transaction.id else {
                continue;
            };
            if transaction.count == 0 {
                continue;
            }
            let Some(price) = ledger.cash_flows.get(id, CashFlowKind::Price) else {
                continue;
            };
            let mut value = self
                .fx
                .convert(price.value.abs(), &price.currency, to_currency)?;
            if let Some(accrued) = ledger.cash_flows.get(id, CashFlowKind::AccruedInterest) {
                value += self
                    .fx
                    .convert(accrued.value.abs(), &accrued.currency, to_currency)?;
            }
            let per_unit = (value / Decimal::from(transaction.count.abs()))
                .round_dp_with_strategy(DECIMAL_PRECISION, RoundingStrategy::MidpointAwayFromZero);
            return Ok(if per_unit.is_zero() {
                None
            } else {
                Some(per_unit)
            });
        }
        Ok(None)
    }

    /// The aggregated figures of one security. A failure inside degrades
    /// this security to an empty status instead of failing the batch.
    pub fn security_status(
        &self,
        ledger: &SecurityLedger,
        filter: &PositionsFilter,
        to_currency: &str,
    ) -> SecurityStatus {
        match self.security_status_inner(ledger, filter, to_currency) {
            Ok(status) => status,
            Err(error) => {
                log::error!(
                    "failed to aggregate figures for {}: {}",
                    ledger.security.id,
                    error
                );
                SecurityStatus::new(&ledger.security, to_currency)
            }
        }
    }

    /// Statuses of independent securities, computed in parallel.
    pub fn security_statuses(
        &self,
        ledgers: &[SecurityLedger],
        filter: &PositionsFilter,
        to_currency: &str,
    ) -> Vec<SecurityStatus> {
        ledgers
            .par_iter()
            .map(|ledger| self.security_status(ledger, filter, to_currency))
            .collect()
    }

    fn security_status_inner(
        &self,
        ledger: &SecurityLedger,
        filter: &PositionsFilter,
        to_currency: &str,
    ) -> Result<SecurityStatus> {
        let kind = ledger.security.kind;
        let positions = self.positions(ledger, filter)?;
        let mut status = SecurityStatus::new(&ledger.security, to_currency);

        status.first_transaction_at = positions.first_transaction_at();
        status.last_transaction_at = positions.last_transaction_at();
        if kind != SecurityKind::CurrencyPair {
            status.last_event_at = ledger
                .events
                .iter()
                .filter(|event| {
                    PAYMENT_EVENT_KINDS.contains(&event.kind) && filter.matches_event(event)
                })
                .map(|event| event.timestamp)
                .max();
        }
        status.buy_count = positions
            .transactions()
            .iter()
            .map(|transaction| transaction.count)
            .filter(|count| *count > 0)
            .sum();
        status.sell_count = positions
            .transactions()
            .iter()
            .map(|transaction| transaction.count)
            .filter(|count| *count < 0)
            .sum::<i64>()
            .abs()
            + positions
                .redemptions()
                .iter()
                .map(|redemption| redemption.count)
                .sum::<i64>();
        let open_count = positions.current_open_count();
        status.open_count = open_count;

        let mut current_quote: Option<SecurityQuote> = None;
        if open_count == 0 {
            let mut gross = self.gross_profit(ledger, &positions, filter, to_currency)?;
            if kind == SecurityKind::StockOrBond {
                gross +=
                    self.sum_payments(&ledger.events, EventKind::Amortization, filter, to_currency)?;
            }
            status.gross_profit = Some(gross);
        } else {
            let denominator = Decimal::from(open_count.abs().max(1));
            let purchase_cost = self.purchase_cost(ledger, &positions, to_currency)?;
            let accrued = self.purchase_accrued_interest(ledger, &positions, to_currency)?;
            let average_price = (purchase_cost.abs() / denominator)
                .round_dp_with_strategy(DECIMAL_PRECISION, RoundingStrategy::ToPositiveInfinity);
            let average_accrued = (accrued.abs() / denominator)
                .round_dp_with_strategy(DECIMAL_PRECISION, RoundingStrategy::ToPositiveInfinity);
            status.average_price = Some(average_price);
            status.average_accrued_interest = Some(average_accrued);

            let quote = self.resolve_current_quote(&ledger.security, filter, to_currency)?;
            match &quote {
                Some(quote) => {
                    let quote_currency = quote
                        .currency
                        .clone()
                        .unwrap_or_else(|| to_currency.to_string());
                    if let Some(clean) = quote.clean_price_in_currency() {
                        status.last_price =
                            Some(self.fx.convert(clean, &quote_currency, to_currency)?);
                    }
                    if let Some(accrued_interest) = quote.accrued_interest {
                        status.last_accrued_interest =
                            Some(self.fx.convert(accrued_interest, &quote_currency, to_currency)?);
                    }
                }
                None => {
                    status.last_price = self.last_transaction_valuation(ledger, to_currency)?;
                }
            }

            status.gross_profit = match kind {
                SecurityKind::Derivative => {
                    Some(self.gross_profit(ledger, &positions, filter, to_currency)?)
                }
                SecurityKind::StockOrBond | SecurityKind::CurrencyPair => {
                    let amortization = if kind == SecurityKind::StockOrBond {
                        self.sum_payments(
                            &ledger.events,
                            EventKind::Amortization,
                            filter,
                            to_currency,
                        )?
                    } else {
                        Decimal::ZERO
                    };
                    status.last_price.map(|last_price| {
                        let last_accrued = status.last_accrued_interest.unwrap_or_default();
                        (last_price + last_accrued - average_price - average_accrued)
                            * Decimal::from(open_count)
                            + amortization
                    })
                }
            };
            current_quote = quote;
        }

        status.commission = self
            .total(
                positions.transactions(),
                &ledger.cash_flows,
                CashFlowKind::Commission,
                to_currency,
            )?
            .abs();
        if kind == SecurityKind::StockOrBond {
            status.coupon =
                self.sum_payments(&ledger.events, EventKind::Coupon, filter, to_currency)?;
            status.amortization =
                self.sum_payments(&ledger.events, EventKind::Amortization, filter, to_currency)?;
            status.dividend =
                self.sum_payments(&ledger.events, EventKind::Dividend, filter, to_currency)?;
            status.tax = self
                .sum_payments(&ledger.events, EventKind::Tax, filter, to_currency)?
                .abs();
        }
        status.internal_rate_of_return = self.returns.internal_rate_of_return(
            ledger,
            &positions,
            current_quote.as_ref(),
            filter,
        );

        Ok(status)
    }

    /// The transaction's flow of the given kind, converted. `None` for
    /// id-less transactions and unrecorded flows.
    fn transaction_flow_value(
        &self,
        transaction: &Transaction,
        cash_flows: &TransactionCashFlowIndex,
        kind: CashFlowKind,
        to_currency: &str,
    ) -> Result<Option<Decimal>> {
        let Some(id) = transaction.id else {
            return Ok(None);
        };
        match cash_flows.get(id, kind) {
            Some(flow) => Ok(Some(self.fx.convert(flow.value, &flow.currency, to_currency)?)),
            None => Ok(None),
        }
    }
}

/// Scales a transaction's cash flow to the matched part of the lot.
fn amount_multiplier(position_count: i64, transaction_count: i64) -> Decimal {
    let position_count = position_count.abs();
    let transaction_count = transaction_count.abs();
    if position_count == transaction_count || transaction_count == 0 {
        return Decimal::ONE;
    }
    (Decimal::from(position_count) / Decimal::from(transaction_count))
        .round_dp_with_strategy(DECIMAL_PRECISION, RoundingStrategy::MidpointAwayFromZero)
}
