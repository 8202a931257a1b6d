//! Normalized market data events.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{InstrumentKey, Venue};

/// The kind of feed a watcher consumes. One watcher task exists per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Prediction-market order book (Polymarket CLOB websocket).
    ClobBook,
    /// Spot/perp price ticker.
    Ticker,
    /// Venue-side position state (detects exchange-triggered exits).
    VenueFills,
}

impl StreamKind {
    /// Feed kind carrying price data for a leg on the given venue.
    #[must_use]
    pub fn for_venue(venue: Venue) -> Self {
        match venue {
            Venue::Polymarket => StreamKind::ClobBook,
            Venue::Hyperliquid | Venue::Binance => StreamKind::Ticker,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamKind::ClobBook => "clob_book",
            StreamKind::Ticker => "ticker",
            StreamKind::VenueFills => "venue_fills",
        };
        write!(f, "{s}")
    }
}

/// Payload of a normalized tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickPayload {
    /// Top-of-book quote.
    Quote { bid: Decimal, ask: Decimal },
    /// Last trade print.
    Trade { price: Decimal },
    /// The venue no longer holds this position (TP/SL fired upstream).
    VenueFlat,
}

/// One normalized market data event, keyed to an instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub kind: StreamKind,
    pub key: InstrumentKey,
    pub payload: TickPayload,
    pub ts: DateTime<Utc>,
}

impl Tick {
    #[must_use]
    pub fn quote(kind: StreamKind, key: InstrumentKey, bid: Decimal, ask: Decimal) -> Self {
        Self {
            kind,
            key,
            payload: TickPayload::Quote { bid, ask },
            ts: Utc::now(),
        }
    }

    #[must_use]
    pub fn trade(kind: StreamKind, key: InstrumentKey, price: Decimal) -> Self {
        Self {
            kind,
            key,
            payload: TickPayload::Trade { price },
            ts: Utc::now(),
        }
    }

    /// Representative price of this tick: trade price, or quote midpoint.
    #[must_use]
    pub fn price(&self) -> Option<Decimal> {
        match &self.payload {
            TickPayload::Quote { bid, ask } => Some((*bid + *ask) / Decimal::TWO),
            TickPayload::Trade { price } => Some(*price),
            TickPayload::VenueFlat => None,
        }
    }
}
