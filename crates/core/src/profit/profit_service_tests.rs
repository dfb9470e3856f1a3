use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use crate::broker::{
    CashFlowKind, DateWindow, EventKind, PositionsFilter, Security, SecurityEventCashFlow,
    SecurityKind, SecurityLedger, Transaction, TransactionCashFlow, TransactionCashFlowIndex,
};
use crate::fx::{CurrencyConverter, ExchangeRate};
use crate::positions::PositionsCache;
use crate::profit::ProfitService;
use crate::quotes::{InMemoryQuoteStore, SecurityQuote};

fn ts(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 4, day, 12, 0, 0).unwrap()
}

fn tx(id: i64, day: u32, count: i64) -> Transaction {
    Transaction {
        id: Some(id),
        portfolio: "broker-a".to_string(),
        security: "SBER".to_string(),
        timestamp: ts(day),
        count,
        trade_id: None,
    }
}

fn movement(day: u32, count: i64) -> Transaction {
    Transaction {
        id: None,
        portfolio: "broker-a".to_string(),
        security: "SBER".to_string(),
        timestamp: ts(day),
        count,
        trade_id: None,
    }
}

fn flow(id: i64, kind: CashFlowKind, value: Decimal, currency: &str) -> TransactionCashFlow {
    TransactionCashFlow {
        transaction_id: id,
        kind,
        value,
        currency: currency.to_string(),
    }
}

fn event(day: u32, kind: EventKind, value: Decimal, count: i64) -> SecurityEventCashFlow {
    SecurityEventCashFlow {
        portfolio: "broker-a".to_string(),
        security: "SBER".to_string(),
        timestamp: ts(day),
        kind,
        value,
        currency: "RUB".to_string(),
        count,
    }
}

fn ledger(
    kind: SecurityKind,
    transactions: Vec<Transaction>,
    flows: Vec<TransactionCashFlow>,
    events: Vec<SecurityEventCashFlow>,
) -> SecurityLedger {
    SecurityLedger {
        security: Security {
            id: "SBER".to_string(),
            name: Some("Sberbank".to_string()),
            kind,
        },
        transactions,
        cash_flows: TransactionCashFlowIndex::from_records(flows),
        events,
    }
}

fn filter() -> PositionsFilter {
    PositionsFilter::all_portfolios(DateWindow::new(ts(1), ts(30)))
}

fn service_with_quotes(quotes: Vec<SecurityQuote>) -> ProfitService {
    let rates = vec![ExchangeRate {
        from_currency: "USD".to_string(),
        to_currency: "RUB".to_string(),
        rate: dec!(60),
        timestamp: ts(1),
    }];
    ProfitService::new(
        Arc::new(CurrencyConverter::with_default_fallbacks(rates)),
        Arc::new(InMemoryQuoteStore::new(quotes)),
        Arc::new(PositionsCache::new()),
    )
}

fn service() -> ProfitService {
    service_with_quotes(Vec::new())
}

#[test]
fn test_round_trip_purchase_cost() {
    // buy 10 for 1000, sell 10 for 1200: the position earned 200
    let transactions = vec![tx(1, 1, 10), tx(2, 10, -10)];
    let ledger = ledger(
        SecurityKind::StockOrBond,
        transactions,
        vec![
            flow(1, CashFlowKind::Price, dec!(-1000), "RUB"),
            flow(2, CashFlowKind::Price, dec!(1200), "RUB"),
        ],
        Vec::new(),
    );
    let service = service();
    let positions = service.positions(&ledger, &filter()).unwrap();

    let cost = service.purchase_cost(&ledger, &positions, "RUB").unwrap();
    assert_eq!(cost, dec!(200));
}

#[test]
fn test_partially_closed_lot_is_scaled() {
    // buy 10 for 1000, sell 4 for 480
    let transactions = vec![tx(1, 1, 10), tx(2, 10, -4)];
    let ledger = ledger(
        SecurityKind::StockOrBond,
        transactions,
        vec![
            flow(1, CashFlowKind::Price, dec!(-1000), "RUB"),
            flow(2, CashFlowKind::Price, dec!(480), "RUB"),
        ],
        Vec::new(),
    );
    let service = service();
    let positions = service.positions(&ledger, &filter()).unwrap();

    // closed pair: -1000 * 0.4 + 480; remaining lot: -1000 * 0.6
    let cost = service.purchase_cost(&ledger, &positions, "RUB").unwrap();
    assert_eq!(cost, dec!(-520));
}

#[test]
fn test_withdrawal_without_sale_counts_opening_alone() {
    let transactions = vec![tx(1, 1, 10), movement(10, -10)];
    let ledger = ledger(
        SecurityKind::StockOrBond,
        transactions,
        vec![flow(1, CashFlowKind::Price, dec!(-1000), "RUB")],
        Vec::new(),
    );
    let service = service();
    let positions = service.positions(&ledger, &filter()).unwrap();

    let cost = service.purchase_cost(&ledger, &positions, "RUB").unwrap();
    assert_eq!(cost, dec!(-1000));
}

#[test]
fn test_split_legs_do_not_move_money() {
    // 1:10 split: the same-day pair neither buys nor sells anything
    let transactions = vec![tx(1, 1, 10), movement(10, -10), movement(10, 100)];
    let ledger = ledger(
        SecurityKind::StockOrBond,
        transactions,
        vec![flow(1, CashFlowKind::Price, dec!(-1000), "RUB")],
        Vec::new(),
    );
    let service = service();
    let positions = service.positions(&ledger, &filter()).unwrap();

    let cost = service.purchase_cost(&ledger, &positions, "RUB").unwrap();
    assert_eq!(cost, dec!(0));
}

#[test]
fn test_redemption_proceeds_come_from_the_event() {
    let transactions = vec![tx(1, 1, 10)];
    let ledger = ledger(
        SecurityKind::StockOrBond,
        transactions,
        vec![flow(1, CashFlowKind::Price, dec!(-1000), "RUB")],
        vec![event(20, EventKind::Redemption, dec!(1100), 10)],
    );
    let service = service();
    let positions = service.positions(&ledger, &filter()).unwrap();
    assert_eq!(positions.current_open_count(), 0);

    let cost = service.purchase_cost(&ledger, &positions, "RUB").unwrap();
    assert_eq!(cost, dec!(100));
}

#[test]
fn test_total_converts_each_flow_individually() {
    let transactions = vec![tx(1, 1, 10), tx(2, 10, -10)];
    let ledger = ledger(
        SecurityKind::StockOrBond,
        transactions,
        vec![
            flow(1, CashFlowKind::Commission, dec!(-2), "USD"),
            flow(2, CashFlowKind::Commission, dec!(-30), "RUB"),
        ],
        Vec::new(),
    );
    let service = service();
    let positions = service.positions(&ledger, &filter()).unwrap();

    // -2 USD at 60 RUB/USD plus -30 RUB
    let commission = service
        .total(
            positions.transactions(),
            &ledger.cash_flows,
            CashFlowKind::Commission,
            "RUB",
        )
        .unwrap();
    assert_eq!(commission, dec!(-150));
}

#[test]
fn test_payment_sums_keep_the_recorded_sign() {
    let ledger = ledger(
        SecurityKind::StockOrBond,
        vec![tx(1, 1, 10)],
        vec![flow(1, CashFlowKind::Price, dec!(-1000), "RUB")],
        vec![
            event(15, EventKind::Dividend, dec!(100), 10),
            event(15, EventKind::Tax, dec!(-13), 10),
        ],
    );
    let service = service();

    let dividend = service
        .sum_payments(&ledger.events, EventKind::Dividend, &filter(), "RUB")
        .unwrap();
    let tax = service
        .sum_payments(&ledger.events, EventKind::Tax, &filter(), "RUB")
        .unwrap();
    assert_eq!(dividend, dec!(100));
    assert_eq!(tax, dec!(-13));
}

#[test]
fn test_derivative_profit_is_the_sum_of_its_events() {
    let transactions = vec![tx(1, 1, 2), tx(2, 10, -2)];
    let ledger = ledger(
        SecurityKind::Derivative,
        transactions,
        Vec::new(),
        vec![
            event(5, EventKind::DerivativeProfit, dec!(300), 2),
            event(9, EventKind::DerivativeProfit, dec!(200), 2),
        ],
    );
    let service = service();
    let status = service.security_status(&ledger, &filter(), "RUB");

    assert_eq!(status.gross_profit, Some(dec!(500)));
    // margin is untracked, so a rate of return is never reported
    assert_eq!(status.internal_rate_of_return, None);
}

#[test]
fn test_open_position_without_quote_has_no_rate() {
    let transactions = vec![tx(1, 1, 5)];
    let ledger = ledger(
        SecurityKind::StockOrBond,
        transactions,
        vec![flow(1, CashFlowKind::Price, dec!(-500), "RUB")],
        Vec::new(),
    );
    let service = service();
    let status = service.security_status(&ledger, &filter(), "RUB");

    assert_eq!(status.open_count, 5);
    assert_eq!(status.internal_rate_of_return, None);
    // valued from the last priced transaction instead of a stored quote
    assert_eq!(status.last_price, Some(dec!(100)));
}

#[test]
fn test_status_of_open_position_with_quote() {
    let transactions = vec![tx(1, 1, 10), tx(2, 10, -4)];
    let quote = SecurityQuote {
        security: "SBER".to_string(),
        timestamp: ts(25),
        quote: dec!(120),
        price: Some(dec!(120)),
        accrued_interest: None,
        currency: None, // defaults to the trade currency
    };
    let ledger = ledger(
        SecurityKind::StockOrBond,
        transactions,
        vec![
            flow(1, CashFlowKind::Price, dec!(-1000), "RUB"),
            flow(2, CashFlowKind::Price, dec!(480), "RUB"),
        ],
        Vec::new(),
    );
    let service = service_with_quotes(vec![quote]);
    let status = service.security_status(&ledger, &filter(), "RUB");

    assert_eq!(status.open_count, 6);
    assert_eq!(status.buy_count, 10);
    assert_eq!(status.sell_count, 4);
    // |cost| / count, rounded up: 520 / 6
    assert_eq!(status.average_price, Some(dec!(86.666667)));
    assert_eq!(status.last_price, Some(dec!(120)));
    // (120 - 86.666667) * 6
    assert_eq!(status.gross_profit, Some(dec!(199.999998)));
    assert!(status.internal_rate_of_return.is_some());
}

#[test]
fn test_closed_security_gross_profit_includes_amortization() {
    let transactions = vec![tx(1, 1, 10), tx(2, 10, -10)];
    let ledger = ledger(
        SecurityKind::StockOrBond,
        transactions,
        vec![
            flow(1, CashFlowKind::Price, dec!(-1000), "RUB"),
            flow(2, CashFlowKind::Price, dec!(900), "RUB"),
        ],
        vec![event(5, EventKind::Amortization, dec!(150), 10)],
    );
    let service = service();
    let status = service.security_status(&ledger, &filter(), "RUB");

    assert_eq!(status.open_count, 0);
    assert_eq!(status.gross_profit, Some(dec!(50)));
    assert_eq!(status.amortization, dec!(150));
}

#[test]
fn test_fallback_valuation_of_a_worthless_position_is_unavailable() {
    let transactions = vec![tx(1, 1, 10)];
    let ledger = ledger(
        SecurityKind::StockOrBond,
        transactions,
        vec![flow(1, CashFlowKind::Price, dec!(0), "RUB")],
        Vec::new(),
    );
    let service = service();

    assert_eq!(
        service.last_transaction_valuation(&ledger, "RUB").unwrap(),
        None
    );
}

#[test]
fn test_currency_pair_cost_and_quote() {
    let mut transactions = vec![tx(1, 1, 1000), tx(2, 10, -1000)];
    for (transaction, contract) in transactions.iter_mut().zip(["USDRUB_TOD", "USDRUB_TOM"]) {
        transaction.security = contract.to_string();
    }
    let ledger = SecurityLedger {
        security: Security {
            id: "USDRUB".to_string(),
            name: None,
            kind: SecurityKind::CurrencyPair,
        },
        transactions,
        cash_flows: TransactionCashFlowIndex::from_records(vec![
            flow(1, CashFlowKind::Price, dec!(-59000), "RUB"),
            flow(2, CashFlowKind::Price, dec!(60500), "RUB"),
        ]),
        events: Vec::new(),
    };
    let service = service();
    let positions = service.positions(&ledger, &filter()).unwrap();
    assert_eq!(positions.current_open_count(), 0);

    let cost = service.purchase_cost(&ledger, &positions, "RUB").unwrap();
    assert_eq!(cost, dec!(1500));

    // the window ends in the past, but only a latest rate is stored; the
    // historical lookup degrades to the configured fallbacks
    let quote = service
        .resolve_current_quote(&ledger.security, &filter(), "RUB")
        .unwrap()
        .unwrap();
    assert_eq!(quote.currency.as_deref(), Some("RUB"));
    assert!(quote.price.is_some());
}

#[test]
fn test_batch_statuses_cover_every_ledger() {
    let ledgers: Vec<SecurityLedger> = (0..8)
        .map(|i| {
            let mut ledger = ledger(
                SecurityKind::StockOrBond,
                vec![tx(1, 1, 10), tx(2, 10, -10)],
                vec![
                    flow(1, CashFlowKind::Price, dec!(-1000), "RUB"),
                    flow(2, CashFlowKind::Price, dec!(1200), "RUB"),
                ],
                Vec::new(),
            );
            ledger.security.id = format!("SEC{}", i);
            for transaction in &mut ledger.transactions {
                transaction.security = ledger.security.id.clone();
            }
            ledger
        })
        .collect();

    let service = service();
    let statuses = service.security_statuses(&ledgers, &filter(), "RUB");

    assert_eq!(statuses.len(), 8);
    for status in statuses {
        assert_eq!(status.gross_profit, Some(dec!(200)));
    }
}
