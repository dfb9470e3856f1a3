use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::broker::{SecurityEventCashFlow, Transaction};
use crate::positions::positions_errors::MatchingError;

/// What ended a matched lot portion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClosingEvent {
    /// An ordinary opposite-signed transaction.
    Sale,
    /// A bond redemption event; there is no closing trade.
    Redemption,
    /// One leg of a same-day deposit/withdrawal pair caused by a stock split.
    SplitLeg,
}

/// A lot acquired by one transaction and not yet fully offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedPosition {
    open_transaction: Transaction,
    /// Positive for a long position, negative for a short position.
    unclosed: i64,
}

impl OpenedPosition {
    pub(crate) fn new(open_transaction: Transaction) -> Self {
        let unclosed = open_transaction.count;
        Self {
            open_transaction,
            unclosed,
        }
    }

    pub(crate) fn with_unclosed(open_transaction: Transaction, unclosed: i64) -> Self {
        Self {
            open_transaction,
            unclosed,
        }
    }

    pub fn open_transaction(&self) -> &Transaction {
        &self.open_transaction
    }

    /// Remaining signed count; shrinks toward zero, never changes sign.
    pub fn unclosed(&self) -> i64 {
        self.unclosed
    }

    pub fn was_opened_at(&self, instant: DateTime<Utc>) -> bool {
        self.open_transaction.timestamp < instant
    }

    /// Offsets `count` units (opposite sign) against this lot.
    pub(crate) fn close(&mut self, count: i64) -> Result<(), MatchingError> {
        if count.abs() > self.unclosed.abs() {
            return Err(MatchingError::OverClose {
                count,
                unclosed: self.unclosed,
            });
        }
        if count.signum() == self.unclosed.signum() {
            return Err(MatchingError::SameSignClose {
                count,
                unclosed: self.unclosed,
            });
        }
        if count == 0 {
            return Err(MatchingError::ZeroClose);
        }
        self.unclosed += count;
        Ok(())
    }
}

/// A matched (opening-lot-portion, closing-portion) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedPosition {
    open_transaction: Transaction,
    /// The closing transaction; synthetic (no id) for redemption closures.
    close_transaction: Transaction,
    /// Matched count, carrying the sign of the opening side.
    count: i64,
    closing_event: ClosingEvent,
}

impl ClosedPosition {
    pub(crate) fn new(
        open_transaction: Transaction,
        close_transaction: Transaction,
        matched: i64,
        closing_event: ClosingEvent,
    ) -> Self {
        let count = matched.abs() * open_transaction.count.signum();
        Self {
            open_transaction,
            close_transaction,
            count,
            closing_event,
        }
    }

    pub fn open_transaction(&self) -> &Transaction {
        &self.open_transaction
    }

    pub fn close_transaction(&self) -> &Transaction {
        &self.close_transaction
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn closing_event(&self) -> ClosingEvent {
        self.closing_event
    }

    pub fn is_long(&self) -> bool {
        self.open_transaction.count > 0
    }
}

/// Net open count after each processed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionHistory {
    pub transaction: Transaction,
    pub open_count_after: i64,
}

impl PositionHistory {
    pub fn instant(&self) -> DateTime<Utc> {
        self.transaction.timestamp
    }
}

/// FIFO-matched positions of one security over one portfolio set and window.
///
/// Built once from the source records and never mutated afterwards; when the
/// underlying data changes the aggregate is recomputed, not patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Positions {
    pub(crate) transactions: Vec<Transaction>,
    pub(crate) redemptions: Vec<SecurityEventCashFlow>,
    pub(crate) histories: Vec<PositionHistory>,
    pub(crate) opened: VecDeque<OpenedPosition>,
    pub(crate) closed: Vec<ClosedPosition>,
    pub(crate) current_open_count: i64,
}

impl Positions {
    /// Remaining lots in FIFO order.
    pub fn opened(&self) -> &VecDeque<OpenedPosition> {
        &self.opened
    }

    /// Matched pairs in FIFO order.
    pub fn closed(&self) -> &[ClosedPosition] {
        &self.closed
    }

    /// The full processed transaction stream, for downstream consumers.
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Redemption events applied after the transaction stream.
    pub fn redemptions(&self) -> &[SecurityEventCashFlow] {
        &self.redemptions
    }

    /// Running net open count after every processed transaction.
    pub fn histories(&self) -> &[PositionHistory] {
        &self.histories
    }

    /// Signed net open count at the end of the window.
    pub fn current_open_count(&self) -> i64 {
        self.current_open_count
    }

    pub fn first_transaction_at(&self) -> Option<DateTime<Utc>> {
        self.histories.first().map(PositionHistory::instant)
    }

    pub fn last_transaction_at(&self) -> Option<DateTime<Utc>> {
        self.histories.last().map(PositionHistory::instant)
    }
}
