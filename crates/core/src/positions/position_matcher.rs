//! Single-pass FIFO matching of a transaction stream into opened and closed
//! lots, including split-leg tagging and redemption closures.

use chrono::NaiveDate;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::broker::{EventKind, SecurityEventCashFlow, Transaction};
use crate::positions::positions_errors::MatchingError;
use crate::positions::positions_model::{
    ClosedPosition, ClosingEvent, OpenedPosition, PositionHistory, Positions,
};

impl Positions {
    /// Matches a chronologically sorted transaction stream (ties broken by
    /// trade id / insertion order upstream) and the security's redemption
    /// events into FIFO lots.
    pub fn new(
        transactions: Vec<Transaction>,
        redemptions: Vec<SecurityEventCashFlow>,
    ) -> Result<Self, MatchingError> {
        let split_legs = detect_split_legs(&transactions);

        let mut histories: Vec<PositionHistory> = Vec::with_capacity(transactions.len());
        let mut opened: VecDeque<OpenedPosition> = VecDeque::new();
        let mut closed: Vec<ClosedPosition> = Vec::new();

        update_past_positions(&transactions, &mut histories);
        for (index, transaction) in transactions.iter().enumerate() {
            if is_increase(transaction, &opened) {
                opened.push_back(OpenedPosition::new(transaction.clone()));
            } else {
                let event = if split_legs.contains(&index) {
                    ClosingEvent::SplitLeg
                } else {
                    ClosingEvent::Sale
                };
                close_positions(transaction.clone(), event, &mut opened, &mut closed)?;
            }
        }

        if !redemptions.is_empty() {
            let synthetic: Vec<Transaction> = redemptions
                .iter()
                .map(redemption_to_transaction)
                .collect::<Result<_, _>>()?;
            update_past_positions(&synthetic, &mut histories);
            for transaction in synthetic {
                close_positions(transaction, ClosingEvent::Redemption, &mut opened, &mut closed)?;
            }
            let remaining = histories.last().map(|h| h.open_count_after).unwrap_or(0);
            if !opened.is_empty() || remaining != 0 {
                let security = redemptions
                    .first()
                    .map(|r| r.security.as_str())
                    .unwrap_or_default();
                let redeemed: i64 = redemptions.iter().map(|r| r.count).sum();
                log::error!(
                    "incomplete transaction history for {}: {} units redeemed but {} still open",
                    security,
                    redeemed,
                    remaining
                );
            }
        }

        let current_open_count = histories.last().map(|h| h.open_count_after).unwrap_or(0);

        Ok(Positions {
            transactions,
            redemptions,
            histories,
            opened,
            closed,
            current_open_count,
        })
    }
}

/// Merges per-contract transaction streams of one instrument (e.g. the
/// settlement-tenor contracts of a currency pair) into a single stream
/// ordered by (timestamp, id).
pub fn merge_contract_streams<I>(streams: I) -> Vec<Transaction>
where
    I: IntoIterator<Item = Vec<Transaction>>,
{
    let mut merged: Vec<Transaction> = streams.into_iter().flatten().collect();
    merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
    merged
}

fn update_past_positions(transactions: &[Transaction], histories: &mut Vec<PositionHistory>) {
    let mut open_count = histories.last().map(|h| h.open_count_after).unwrap_or(0);
    for transaction in transactions {
        open_count += transaction.count;
        histories.push(PositionHistory {
            transaction: transaction.clone(),
            open_count_after: open_count,
        });
    }
}

fn is_increase(transaction: &Transaction, opened: &VecDeque<OpenedPosition>) -> bool {
    match opened.front() {
        None => true,
        Some(front) => {
            front.unclosed() == 0 || transaction.count.signum() == front.unclosed().signum()
        }
    }
}

/// Drains the FIFO queue against a position-decreasing transaction. A
/// remainder after the queue is empty starts a new cycle of the opposite
/// sign (e.g. opening a short).
fn close_positions(
    closing: Transaction,
    event: ClosingEvent,
    opened: &mut VecDeque<OpenedPosition>,
    closed: &mut Vec<ClosedPosition>,
) -> Result<(), MatchingError> {
    let mut closing_count = closing.count.abs();
    while closing_count > 0 {
        let Some(front) = opened.front_mut() else {
            break;
        };
        let opened_count = front.unclosed().abs();
        let matched = opened_count.min(closing_count);
        let open_transaction = front.open_transaction().clone();
        if opened_count <= closing_count {
            opened.pop_front();
        } else {
            front.close(closing.count.signum() * matched)?;
        }
        closed.push(ClosedPosition::new(
            open_transaction,
            closing.clone(),
            matched,
            event,
        ));
        closing_count -= matched;
    }
    if closing_count != 0 {
        opened.push_back(OpenedPosition::with_unclosed(
            closing.clone(),
            closing.count.signum() * closing_count,
        ));
    }
    Ok(())
}

/// Converts a bond redemption event to a synthetic closing transaction.
fn redemption_to_transaction(
    redemption: &SecurityEventCashFlow,
) -> Result<Transaction, MatchingError> {
    if redemption.kind != EventKind::Redemption {
        return Err(MatchingError::UnexpectedEventKind(
            redemption.kind.as_str().to_string(),
        ));
    }
    Ok(Transaction {
        id: None,
        portfolio: redemption.portfolio.clone(),
        security: redemption.security.clone(),
        timestamp: redemption.timestamp,
        count: -redemption.count,
        trade_id: None,
    })
}

/// Finds id-less transactions forming a same-calendar-day opposite-signed
/// deposit/withdrawal pair for one portfolio and security. Such pairs are
/// the observable footprint of a stock split, not real account movements.
fn detect_split_legs(transactions: &[Transaction]) -> HashSet<usize> {
    let mut groups: HashMap<(&str, &str, NaiveDate), Vec<usize>> = HashMap::new();
    for (index, transaction) in transactions.iter().enumerate() {
        if transaction.is_deposit_or_withdrawal() {
            let key = (
                transaction.portfolio.as_str(),
                transaction.security.as_str(),
                transaction.timestamp.date_naive(),
            );
            groups.entry(key).or_default().push(index);
        }
    }

    let mut legs = HashSet::new();
    for indexes in groups.values() {
        let has_deposit = indexes.iter().any(|&i| transactions[i].count > 0);
        let has_withdrawal = indexes.iter().any(|&i| transactions[i].count < 0);
        if has_deposit && has_withdrawal {
            legs.extend(indexes.iter().copied());
        }
    }
    legs
}
