use bittrex_core::{OrderBookEntry, OrderBookSnapshot, OrderBookUpdate};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Result of offering a delta to a [`LocalOrderBook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// `sequence == local + 1`; levels updated and sequence advanced.
    Applied,
    /// Already covered by the local state (`sequence <= local`).
    Stale,
    /// Updates were missed; the book must be reseeded.
    Gap { expected: i64, received: i64 },
}

/// Price-level book for one symbol.
///
/// Bids and asks are kept as `rate -> quantity` maps. `sequence` is the
/// sequence number of the last snapshot or delta folded into the levels.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalOrderBook {
    symbol: String,
    sequence: i64,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl LocalOrderBook {
    pub fn from_snapshot(snapshot: &OrderBookSnapshot) -> Self {
        let mut book = Self {
            symbol: snapshot.symbol.clone(),
            sequence: snapshot.sequence,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        };
        for entry in &snapshot.bids {
            set_level(&mut book.bids, entry);
        }
        for entry in &snapshot.asks {
            set_level(&mut book.asks, entry);
        }
        book
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    /// Fold `update` into the book if it is the next delta in sequence.
    pub fn apply(&mut self, update: &OrderBookUpdate) -> DeltaOutcome {
        if update.sequence <= self.sequence {
            return DeltaOutcome::Stale;
        }
        // A book already at i64::MAX has no successor; treat anything newer as a gap.
        let Some(expected) = self.sequence.checked_add(1) else {
            return DeltaOutcome::Gap {
                expected: self.sequence,
                received: update.sequence,
            };
        };
        if update.sequence != expected {
            return DeltaOutcome::Gap {
                expected,
                received: update.sequence,
            };
        }

        for entry in &update.bid_deltas {
            set_level(&mut self.bids, entry);
        }
        for entry in &update.ask_deltas {
            set_level(&mut self.asks, entry);
        }
        self.sequence = update.sequence;
        DeltaOutcome::Applied
    }

    /// Bids, best (highest rate) first.
    pub fn bids(&self) -> Vec<OrderBookEntry> {
        self.bids
            .iter()
            .rev()
            .map(|(rate, quantity)| OrderBookEntry::new(*rate, *quantity))
            .collect()
    }

    /// Asks, best (lowest rate) first.
    pub fn asks(&self) -> Vec<OrderBookEntry> {
        self.asks
            .iter()
            .map(|(rate, quantity)| OrderBookEntry::new(*rate, *quantity))
            .collect()
    }

    pub fn best_bid(&self) -> Option<OrderBookEntry> {
        self.bids
            .iter()
            .next_back()
            .map(|(rate, quantity)| OrderBookEntry::new(*rate, *quantity))
    }

    pub fn best_ask(&self) -> Option<OrderBookEntry> {
        self.asks
            .iter()
            .next()
            .map(|(rate, quantity)| OrderBookEntry::new(*rate, *quantity))
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.rate - self.best_bid()?.rate)
    }

    pub fn to_snapshot(&self) -> OrderBookSnapshot {
        OrderBookSnapshot {
            symbol: self.symbol.clone(),
            sequence: self.sequence,
            bids: self.bids(),
            asks: self.asks(),
        }
    }
}

/// Zero quantity removes the level.
fn set_level(side: &mut BTreeMap<Decimal, Decimal>, entry: &OrderBookEntry) {
    if entry.quantity.is_zero() {
        side.remove(&entry.rate);
    } else {
        side.insert(entry.rate, entry.quantity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bittrex_core::OrderBookDepth;
    use rust_decimal_macros::dec;

    fn snapshot() -> OrderBookSnapshot {
        OrderBookSnapshot {
            symbol: "BTC-USD".to_string(),
            sequence: 100,
            bids: vec![
                OrderBookEntry::new(dec!(99), dec!(1)),
                OrderBookEntry::new(dec!(98), dec!(2)),
            ],
            asks: vec![
                OrderBookEntry::new(dec!(101), dec!(1.5)),
                OrderBookEntry::new(dec!(102), dec!(3)),
            ],
        }
    }

    fn delta(
        sequence: i64,
        bids: Vec<OrderBookEntry>,
        asks: Vec<OrderBookEntry>,
    ) -> OrderBookUpdate {
        OrderBookUpdate {
            market_symbol: "BTC-USD".to_string(),
            depth: OrderBookDepth::TwentyFive,
            sequence,
            bid_deltas: bids,
            ask_deltas: asks,
        }
    }

    #[test]
    fn test_seed_orders_levels() {
        let book = LocalOrderBook::from_snapshot(&snapshot());
        assert_eq!(book.sequence(), 100);
        assert_eq!(book.best_bid(), Some(OrderBookEntry::new(dec!(99), dec!(1))));
        assert_eq!(book.best_ask(), Some(OrderBookEntry::new(dec!(101), dec!(1.5))));
        assert_eq!(book.bids()[1].rate, dec!(98));
        assert_eq!(book.spread(), Some(dec!(2)));
    }

    #[test]
    fn test_next_delta_applies() {
        let mut book = LocalOrderBook::from_snapshot(&snapshot());
        let outcome = book.apply(&delta(
            101,
            vec![
                OrderBookEntry::new(dec!(99), dec!(0)),
                OrderBookEntry::new(dec!(99.5), dec!(4)),
            ],
            vec![OrderBookEntry::new(dec!(102), dec!(1))],
        ));

        assert_eq!(outcome, DeltaOutcome::Applied);
        assert_eq!(book.sequence(), 101);
        assert_eq!(
            book.bids(),
            vec![
                OrderBookEntry::new(dec!(99.5), dec!(4)),
                OrderBookEntry::new(dec!(98), dec!(2)),
            ]
        );
        assert_eq!(
            book.asks(),
            vec![
                OrderBookEntry::new(dec!(101), dec!(1.5)),
                OrderBookEntry::new(dec!(102), dec!(1)),
            ]
        );
    }

    #[test]
    fn test_gap_leaves_book_untouched() {
        let mut book = LocalOrderBook::from_snapshot(&snapshot());
        let before = book.clone();

        let outcome = book.apply(&delta(102, vec![OrderBookEntry::new(dec!(97), dec!(1))], vec![]));

        assert_eq!(
            outcome,
            DeltaOutcome::Gap {
                expected: 101,
                received: 102
            }
        );
        assert_eq!(book, before);
    }

    #[test]
    fn test_stale_delta_ignored() {
        let mut book = LocalOrderBook::from_snapshot(&snapshot());
        let before = book.clone();

        assert_eq!(book.apply(&delta(100, vec![], vec![])), DeltaOutcome::Stale);
        assert_eq!(book.apply(&delta(42, vec![], vec![])), DeltaOutcome::Stale);
        assert_eq!(book, before);
    }

    #[test]
    fn test_sequence_at_max_never_applies() {
        let mut book = LocalOrderBook::from_snapshot(&OrderBookSnapshot {
            sequence: i64::MAX - 1,
            ..snapshot()
        });

        assert_eq!(book.apply(&delta(i64::MAX, vec![], vec![])), DeltaOutcome::Applied);
        assert_eq!(book.sequence(), i64::MAX);
        assert_eq!(book.apply(&delta(i64::MAX, vec![], vec![])), DeltaOutcome::Stale);
        assert_eq!(book.apply(&delta(i64::MIN, vec![], vec![])), DeltaOutcome::Stale);
    }

    #[test]
    fn test_removing_missing_level_is_noop() {
        let mut book = LocalOrderBook::from_snapshot(&snapshot());
        book.apply(&delta(101, vec![OrderBookEntry::new(dec!(50), dec!(0))], vec![]));
        assert_eq!(book.bids().len(), 2);
    }

    #[test]
    fn test_consecutive_deltas_match_snapshot_of_result() {
        // Seeding from S then applying D1..Dn must equal seeding from the
        // state those deltas produce.
        let mut book = LocalOrderBook::from_snapshot(&snapshot());
        book.apply(&delta(101, vec![OrderBookEntry::new(dec!(98), dec!(0))], vec![]));
        book.apply(&delta(
            102,
            vec![OrderBookEntry::new(dec!(100), dec!(0.1))],
            vec![OrderBookEntry::new(dec!(101), dec!(0))],
        ));
        book.apply(&delta(103, vec![OrderBookEntry::new(dec!(100), dec!(0.3))], vec![]));

        let expected = LocalOrderBook::from_snapshot(&OrderBookSnapshot {
            symbol: "BTC-USD".to_string(),
            sequence: 103,
            bids: vec![
                OrderBookEntry::new(dec!(100), dec!(0.3)),
                OrderBookEntry::new(dec!(99), dec!(1)),
            ],
            asks: vec![OrderBookEntry::new(dec!(102), dec!(3))],
        });
        assert_eq!(book, expected);
        assert_eq!(book.to_snapshot().sequence, 103);
    }
}
