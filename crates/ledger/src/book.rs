use core_types::{Position, Trade, TradeEntry, TradeSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;
use uuid::Uuid;

/// A non-fatal data-quality finding raised while replaying the ledger.
///
/// These are warnings, not errors: reconciliation proceeds with a best-effort
/// interpretation because broker feeds routinely arrive out of order.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Inconsistency {
    #[error("Closing trade {trade_id} on {instrument} exceeds open quantity by {excess}; opening a fresh position")]
    UnmatchedClose {
        trade_id: Uuid,
        instrument: String,
        excess: Decimal,
    },

    #[error("Opening trade {trade_id} on {instrument} opposes the existing open side; netting it instead")]
    OpposingIncrease { trade_id: Uuid, instrument: String },

    #[error("Trade {trade_id} on {instrument} has non-positive size {size}; ignored")]
    NonPositiveSize {
        trade_id: Uuid,
        instrument: String,
        size: Decimal,
    },

    #[error("Broker-reported profit {broker} diverges from FIFO-matched P&L {matched}")]
    ProfitMismatch { broker: Decimal, matched: Decimal },
}

/// One open lot: a quantity still exposed at the price it was opened at.
#[derive(Debug, Clone, PartialEq)]
struct Lot {
    size: Decimal,
    price: Decimal,
}

/// The open lots for a single instrument. An instrument book holds exactly
/// one direction at a time; offsetting flow consumes lots oldest-first.
#[derive(Debug, Clone)]
struct InstrumentBook {
    side: TradeSide,
    lots: VecDeque<Lot>,
}

impl InstrumentBook {
    fn total_size(&self) -> Decimal {
        self.lots.iter().map(|lot| lot.size).sum()
    }
}

/// What applying one trade to the book produced.
#[derive(Debug, Clone, Default)]
pub struct Applied {
    /// Price-based P&L realized by this trade against matched lots.
    pub realized: Decimal,
    pub warnings: Vec<Inconsistency>,
}

/// The FIFO lot book for one trading account.
///
/// `In` trades push lots; `Out` trades consume the oldest lots of the
/// opposite side first, realizing price-based P&L for the matched quantity.
/// Instruments whose open quantity reaches zero are dropped from the book.
///
/// Keyed by a `BTreeMap` so that the derived position list is ordered
/// deterministically regardless of trade arrival order.
#[derive(Debug, Clone, Default)]
pub struct LotBook {
    books: BTreeMap<String, InstrumentBook>,
}

impl LotBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a single trade to the book, in ledger order.
    pub fn apply(&mut self, trade: &Trade) -> Applied {
        let mut applied = Applied::default();

        if trade.size <= Decimal::ZERO {
            applied.warnings.push(Inconsistency::NonPositiveSize {
                trade_id: trade.id,
                instrument: trade.instrument.clone(),
                size: trade.size,
            });
            return applied;
        }

        match trade.entry {
            TradeEntry::In => self.apply_open(trade, &mut applied),
            TradeEntry::Out => self.apply_close(trade, &mut applied),
        }
        applied
    }

    /// Derives the current open positions, one per instrument with remaining
    /// quantity, with a volume-weighted average entry price.
    pub fn positions(&self) -> Vec<Position> {
        self.books
            .iter()
            .filter(|(_, book)| !book.lots.is_empty())
            .map(|(instrument, book)| {
                let net_size = book.total_size();
                let weighted: Decimal =
                    book.lots.iter().map(|lot| lot.size * lot.price).sum();
                Position {
                    instrument: instrument.clone(),
                    side: book.side,
                    net_size,
                    avg_entry_price: weighted / net_size,
                }
            })
            .collect()
    }

    fn apply_open(&mut self, trade: &Trade, applied: &mut Applied) {
        let opposed = self
            .books
            .get(&trade.instrument)
            .is_some_and(|book| book.side != trade.side && !book.lots.is_empty());

        if opposed {
            // An `in` trade against an open book of the opposite side cannot
            // be represented as an increase on a netting venue. Treat it as
            // offsetting flow, flipping on any excess.
            applied.warnings.push(Inconsistency::OpposingIncrease {
                trade_id: trade.id,
                instrument: trade.instrument.clone(),
            });
            self.consume(trade, trade.entry_price, applied);
        } else {
            self.push_lot(&trade.instrument, trade.side, trade.size, trade.entry_price);
        }
    }

    fn apply_close(&mut self, trade: &Trade, applied: &mut Applied) {
        // An `out` sell closes longs, an `out` buy closes shorts. Brokers
        // report the closing execution price either as the trade's own price
        // or as an explicit exit price.
        let close_price = trade.exit_price.unwrap_or(trade.entry_price);
        let matchable = self
            .books
            .get(&trade.instrument)
            .is_some_and(|book| book.side == trade.side.opposite() && !book.lots.is_empty());

        if matchable {
            self.consume(trade, close_price, applied);
        } else {
            // Nothing to close against: the whole quantity becomes a new
            // position in the closing trade's own direction.
            applied.warnings.push(Inconsistency::UnmatchedClose {
                trade_id: trade.id,
                instrument: trade.instrument.clone(),
                excess: trade.size,
            });
            self.push_lot(&trade.instrument, trade.side, trade.size, close_price);
        }
    }

    /// Consumes open lots of the side opposite to `trade.side`, oldest first,
    /// realizing P&L for the matched quantity. Any excess flips the book into
    /// the trade's own direction.
    fn consume(&mut self, trade: &Trade, price: Decimal, applied: &mut Applied) {
        let mut remaining = trade.size;

        if let Some(book) = self.books.get_mut(&trade.instrument) {
            let closed_side_sign = book.side.sign();
            while remaining > Decimal::ZERO {
                let Some(front) = book.lots.front_mut() else {
                    break;
                };
                let matched = remaining.min(front.size);
                applied.realized += (price - front.price) * matched * closed_side_sign;
                front.size -= matched;
                remaining -= matched;
                if front.size.is_zero() {
                    book.lots.pop_front();
                }
            }
            if book.lots.is_empty() {
                self.books.remove(&trade.instrument);
            }
        }

        if remaining > Decimal::ZERO {
            applied.warnings.push(Inconsistency::UnmatchedClose {
                trade_id: trade.id,
                instrument: trade.instrument.clone(),
                excess: remaining,
            });
            self.push_lot(&trade.instrument, trade.side, remaining, price);
        }
    }

    fn push_lot(&mut self, instrument: &str, side: TradeSide, size: Decimal, price: Decimal) {
        let book = self
            .books
            .entry(instrument.to_string())
            .or_insert_with(|| InstrumentBook {
                side,
                lots: VecDeque::new(),
            });
        // The entry above only runs for a fresh instrument; a surviving book
        // always matches `side` because opposing flow is netted first.
        book.side = side;
        book.lots.push_back(Lot { size, price });
    }
}
