use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A brokerage transaction: an acquisition or disposal of a security.
///
/// `id` is absent for pure securities deposits/withdrawals, which carry no
/// attached cash flows. `count` is signed: positive acquires, negative
/// disposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Option<i64>,
    pub portfolio: String,
    pub security: String,
    pub timestamp: DateTime<Utc>,
    pub count: i64,
    pub trade_id: Option<String>,
}

impl Transaction {
    /// A transaction without an id moved securities in or out of the account
    /// without an associated trade.
    pub fn is_deposit_or_withdrawal(&self) -> bool {
        self.id.is_none()
    }
}

/// Kind of a cash flow attached to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CashFlowKind {
    Price,
    AccruedInterest,
    Commission,
    DerivativePrice,
    DerivativeQuote,
}

impl CashFlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CashFlowKind::Price => "price",
            CashFlowKind::AccruedInterest => "accruedInterest",
            CashFlowKind::Commission => "commission",
            CashFlowKind::DerivativePrice => "derivativePrice",
            CashFlowKind::DerivativeQuote => "derivativeQuote",
        }
    }
}

/// A cash amount settled together with a transaction.
///
/// Sign convention follows the account's point of view: money paid out of the
/// account (an acquisition price, a commission) is negative, money received
/// (sale proceeds) is positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCashFlow {
    pub transaction_id: i64,
    pub kind: CashFlowKind,
    pub value: Decimal,
    pub currency: String,
}

/// Kind of a security-level cash event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Dividend,
    Coupon,
    Amortization,
    Redemption,
    Tax,
    DerivativeProfit,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Dividend => "dividend",
            EventKind::Coupon => "coupon",
            EventKind::Amortization => "amortization",
            EventKind::Redemption => "redemption",
            EventKind::Tax => "tax",
            EventKind::DerivativeProfit => "derivativeProfit",
        }
    }
}

/// A cash event paid on a security position (dividend, coupon, ...),
/// independent of any single transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEventCashFlow {
    pub portfolio: String,
    pub security: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub value: Decimal,
    pub currency: String,
    pub count: i64,
}

/// Coarse security classification driving the profit formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecurityKind {
    StockOrBond,
    Derivative,
    CurrencyPair,
}

impl SecurityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityKind::StockOrBond => "stockOrBond",
            SecurityKind::Derivative => "derivative",
            SecurityKind::CurrencyPair => "currencyPair",
        }
    }
}

/// A security identified by the id its broker reports use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Security {
    pub id: String,
    pub name: Option<String>,
    pub kind: SecurityKind,
}

impl Security {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Strips the settlement-tenor suffix from a currency contract id:
/// `"USDRUB_TOM"` -> `"USDRUB"`.
pub fn currency_pair_of(contract: &str) -> &str {
    contract.split('_').next().unwrap_or(contract)
}

/// Splits a six-letter pair id into base and quote currency:
/// `"USDRUB"` -> `("USD", "RUB")`.
pub fn pair_currencies(pair: &str) -> Option<(&str, &str)> {
    if pair.len() >= 6 && pair.is_char_boundary(3) && pair.is_char_boundary(6) {
        Some((&pair[..3], &pair[3..6]))
    } else {
        None
    }
}

/// Cash flows indexed by transaction id, passed explicitly into every
/// calculation that needs them.
#[derive(Debug, Clone, Default)]
pub struct TransactionCashFlowIndex {
    by_transaction: HashMap<i64, Vec<TransactionCashFlow>>,
}

impl TransactionCashFlowIndex {
    pub fn from_records(records: Vec<TransactionCashFlow>) -> Self {
        let mut by_transaction: HashMap<i64, Vec<TransactionCashFlow>> = HashMap::new();
        for record in records {
            by_transaction
                .entry(record.transaction_id)
                .or_default()
                .push(record);
        }
        Self { by_transaction }
    }

    /// The flow of the given kind for the transaction, if recorded.
    pub fn get(&self, transaction_id: i64, kind: CashFlowKind) -> Option<&TransactionCashFlow> {
        self.by_transaction
            .get(&transaction_id)
            .and_then(|flows| flows.iter().find(|flow| flow.kind == kind))
    }

    /// Every flow settled with the transaction.
    pub fn for_transaction(&self, transaction_id: i64) -> &[TransactionCashFlow] {
        self.by_transaction
            .get(&transaction_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.by_transaction.is_empty()
    }
}

/// All loaded records for one security: the unit of computation.
///
/// For a currency pair the transactions of every settlement-tenor contract
/// are bundled together; the matcher merges and re-sorts them.
#[derive(Debug, Clone, Default)]
pub struct SecurityLedger {
    pub security: Security,
    pub transactions: Vec<Transaction>,
    pub cash_flows: TransactionCashFlowIndex,
    pub events: Vec<SecurityEventCashFlow>,
}

impl Default for Security {
    fn default() -> Self {
        Security {
            id: String::new(),
            name: None,
            kind: SecurityKind::StockOrBond,
        }
    }
}

impl SecurityLedger {
    pub fn events_of_kind(&self, kind: EventKind) -> impl Iterator<Item = &SecurityEventCashFlow> {
        self.events.iter().filter(move |event| event.kind == kind)
    }
}

/// An inclusive date window bounding which records participate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateWindow {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at <= self.to
    }
}

/// Scopes a computation to a set of portfolios (empty = all) and a window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsFilter {
    pub portfolios: Vec<String>,
    pub window: DateWindow,
}

impl PositionsFilter {
    pub fn new(portfolios: Vec<String>, window: DateWindow) -> Self {
        Self { portfolios, window }
    }

    pub fn all_portfolios(window: DateWindow) -> Self {
        Self {
            portfolios: Vec::new(),
            window,
        }
    }

    pub fn matches_portfolio(&self, portfolio: &str) -> bool {
        self.portfolios.is_empty() || self.portfolios.iter().any(|p| p == portfolio)
    }

    pub fn matches_transaction(&self, transaction: &Transaction) -> bool {
        self.matches_portfolio(&transaction.portfolio)
            && self.window.contains(transaction.timestamp)
    }

    pub fn matches_event(&self, event: &SecurityEventCashFlow) -> bool {
        self.matches_portfolio(&event.portfolio) && self.window.contains(event.timestamp)
    }
}
