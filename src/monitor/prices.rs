//! Shared last-price cache.
//!
//! The evaluator writes every priced tick here; the paper gateway and the
//! spread checks read it. Lock-free reads via `DashMap`.

use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::domain::{InstrumentKey, Tick, TickPayload};

/// Last seen quote per instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastQuote {
    pub bid: Decimal,
    pub ask: Decimal,
}

impl LastQuote {
    #[must_use]
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

#[derive(Debug, Default)]
pub struct PriceCache {
    quotes: DashMap<InstrumentKey, LastQuote>,
}

impl PriceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tick. Trades update both sides to the trade price.
    pub fn record(&self, tick: &Tick) {
        match &tick.payload {
            TickPayload::Quote { bid, ask } => {
                self.quotes.insert(
                    tick.key.clone(),
                    LastQuote {
                        bid: *bid,
                        ask: *ask,
                    },
                );
            }
            TickPayload::Trade { price } => {
                self.quotes.insert(
                    tick.key.clone(),
                    LastQuote {
                        bid: *price,
                        ask: *price,
                    },
                );
            }
            TickPayload::VenueFlat => {}
        }
    }

    #[must_use]
    pub fn quote(&self, key: &InstrumentKey) -> Option<LastQuote> {
        self.quotes.get(key).map(|q| *q)
    }

    #[must_use]
    pub fn mid(&self, key: &InstrumentKey) -> Option<Decimal> {
        self.quote(key).map(|q| q.mid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{StreamKind, Tick};
    use rust_decimal_macros::dec;

    #[test]
    fn quote_then_trade_overwrites() {
        let cache = PriceCache::new();
        cache.record(&Tick::quote(StreamKind::ClobBook, "a".into(), dec!(0.40), dec!(0.44)));
        assert_eq!(cache.mid(&"a".into()), Some(dec!(0.42)));

        cache.record(&Tick::trade(StreamKind::ClobBook, "a".into(), dec!(0.50)));
        assert_eq!(cache.mid(&"a".into()), Some(dec!(0.50)));
    }

    #[test]
    fn missing_key_is_none() {
        let cache = PriceCache::new();
        assert_eq!(cache.mid(&"nope".into()), None);
    }
}
