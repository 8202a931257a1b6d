//! Polymarket CLOB market data feed.
//!
//! Implements [`TickStream`] over the CLOB market websocket. The server keeps
//! the connection alive through an application-level `PING` text heartbeat
//! (every 10 seconds, answered with `PONG`), on top of protocol ping frames.
//! `book` events yield top-of-book quotes and `last_trade_price` events yield
//! trade prints, both normalized into [`Tick`]s.

use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::domain::{InstrumentKey, StreamKind, Tick, TickPayload};
use crate::error::{Error, Result};
use crate::stream::{QuoteFetcher, StreamEvent, StreamFactory, TickStream};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Initial subscription message for the market channel.
#[derive(Debug, Serialize)]
struct SubscribeMessage {
    assets_ids: Vec<String>,
    #[serde(rename = "type")]
    channel: &'static str,
}

/// Incremental subscription change on an already-open connection.
#[derive(Debug, Serialize)]
struct UpdateMessage {
    assets_ids: Vec<String>,
    operation: &'static str,
}

#[derive(Debug, Deserialize)]
struct WsLevel {
    price: String,
    #[allow(dead_code)]
    size: String,
}

/// Market channel events we care about. Everything else falls into `Other`.
#[derive(Debug, Deserialize)]
#[serde(tag = "event_type")]
enum WsEvent {
    #[serde(rename = "book")]
    Book {
        asset_id: String,
        bids: Vec<WsLevel>,
        asks: Vec<WsLevel>,
    },
    #[serde(rename = "last_trade_price")]
    LastTrade { asset_id: String, price: String },
    #[serde(other)]
    Other,
}

/// Live Polymarket market data stream.
pub struct PolymarketStream {
    url: String,
    ws: Option<WsStream>,
    subscribed: HashSet<InstrumentKey>,
    heartbeat: Option<tokio::time::Interval>,
    /// Ticks parsed but not yet handed out (one ws message can carry several).
    pending: VecDeque<Tick>,
}

impl PolymarketStream {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ws: None,
            subscribed: HashSet::new(),
            heartbeat: None,
            pending: VecDeque::new(),
        }
    }

    fn parse_decimal(raw: &str, field: &str) -> Option<Decimal> {
        match Decimal::from_str(raw) {
            Ok(d) => Some(d),
            Err(e) => {
                warn!(raw = %raw, field = %field, error = %e, "Unparseable decimal in feed");
                None
            }
        }
    }

    /// Parse one text frame into zero or more ticks. The feed sends both
    /// single events and arrays of events.
    fn parse_frame(&mut self, text: &str) {
        let events: Vec<WsEvent> = if text.trim_start().starts_with('[') {
            match serde_json::from_str(text) {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = %e, "Failed to parse event array");
                    return;
                }
            }
        } else {
            match serde_json::from_str::<WsEvent>(text) {
                Ok(event) => vec![event],
                Err(e) => {
                    warn!(error = %e, raw = %text, "Failed to parse event");
                    return;
                }
            }
        };

        for event in events {
            match event {
                WsEvent::Book {
                    asset_id,
                    bids,
                    asks,
                } => {
                    // Levels arrive sorted away from the touch; the best
                    // quote is the last bid and the first ask.
                    let best_bid = bids
                        .last()
                        .and_then(|l| Self::parse_decimal(&l.price, "bid"));
                    let best_ask = asks
                        .first()
                        .and_then(|l| Self::parse_decimal(&l.price, "ask"));
                    if let (Some(bid), Some(ask)) = (best_bid, best_ask) {
                        self.pending.push_back(Tick::quote(
                            StreamKind::ClobBook,
                            InstrumentKey::new(asset_id),
                            bid,
                            ask,
                        ));
                    }
                }
                WsEvent::LastTrade { asset_id, price } => {
                    if let Some(price) = Self::parse_decimal(&price, "price") {
                        self.pending.push_back(Tick::trade(
                            StreamKind::ClobBook,
                            InstrumentKey::new(asset_id),
                            price,
                        ));
                    }
                }
                WsEvent::Other => {}
            }
        }
    }

    async fn send_json<T: Serialize>(&mut self, msg: &T) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        let ws = self
            .ws
            .as_mut()
            .ok_or_else(|| Error::Connection("not connected".to_string()))?;
        ws.send(Message::Text(json)).await?;
        Ok(())
    }
}

#[async_trait]
impl TickStream for PolymarketStream {
    async fn connect(&mut self) -> Result<()> {
        info!(url = %self.url, "Connecting to Polymarket WebSocket");
        let (ws, response) = connect_async(&self.url).await?;
        info!(status = %response.status(), "WebSocket connected");

        self.ws = Some(ws);
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);
        self.pending.clear();
        Ok(())
    }

    async fn subscribe(&mut self, keys: &[InstrumentKey]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let assets_ids: Vec<String> = keys.iter().map(|k| k.as_str().to_string()).collect();

        if self.subscribed.is_empty() {
            info!(assets = assets_ids.len(), "Subscribing to market channel");
            self.send_json(&SubscribeMessage {
                assets_ids,
                channel: "market",
            })
            .await?;
        } else {
            debug!(assets = assets_ids.len(), "Adding subscriptions");
            self.send_json(&UpdateMessage {
                assets_ids,
                operation: "subscribe",
            })
            .await?;
        }

        self.subscribed.extend(keys.iter().cloned());
        Ok(())
    }

    async fn unsubscribe(&mut self, keys: &[InstrumentKey]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let assets_ids: Vec<String> = keys.iter().map(|k| k.as_str().to_string()).collect();
        debug!(assets = assets_ids.len(), "Removing subscriptions");
        self.send_json(&UpdateMessage {
            assets_ids,
            operation: "unsubscribe",
        })
        .await?;
        for key in keys {
            self.subscribed.remove(key);
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(tick) = self.pending.pop_front() {
                return Some(StreamEvent::Tick(tick));
            }

            let (ws, heartbeat) = match (self.ws.as_mut(), self.heartbeat.as_mut()) {
                (Some(ws), Some(hb)) => (ws, hb),
                _ => return None,
            };

            tokio::select! {
                _ = heartbeat.tick() => {
                    if let Err(e) = ws.send(Message::Text("PING".to_string())).await {
                        self.ws = None;
                        return Some(StreamEvent::Disconnected {
                            reason: format!("heartbeat send failed: {e}"),
                        });
                    }
                }
                msg = ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text == "PONG" {
                            continue;
                        }
                        self.parse_frame(&text);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws.send(Message::Pong(data)).await.is_err() {
                            self.ws = None;
                            return Some(StreamEvent::Disconnected {
                                reason: "pong send failed".to_string(),
                            });
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        self.ws = None;
                        return Some(StreamEvent::Disconnected {
                            reason: format!("closed by server: {frame:?}"),
                        });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.ws = None;
                        return Some(StreamEvent::Disconnected {
                            reason: e.to_string(),
                        });
                    }
                    None => {
                        self.ws = None;
                        return Some(StreamEvent::Disconnected {
                            reason: "stream ended".to_string(),
                        });
                    }
                }
            }
        }
    }

    fn kind(&self) -> StreamKind {
        StreamKind::ClobBook
    }

    fn source_name(&self) -> &'static str {
        "polymarket"
    }
}

/// Builds fresh CLOB book streams for the coordinator.
pub struct PolymarketStreamFactory {
    ws_url: String,
}

impl PolymarketStreamFactory {
    #[must_use]
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }
}

impl StreamFactory for PolymarketStreamFactory {
    fn kind(&self) -> StreamKind {
        StreamKind::ClobBook
    }

    fn create(&self) -> Box<dyn TickStream> {
        Box::new(PolymarketStream::new(self.ws_url.clone()))
    }
}

/// REST quote lookup against the CLOB midpoint endpoint, used by the
/// fallback reconciler when the stream has been quiet.
pub struct PolymarketQuoteFetcher {
    api_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MidpointResponse {
    mid: String,
}

impl PolymarketQuoteFetcher {
    #[must_use]
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl QuoteFetcher for PolymarketQuoteFetcher {
    async fn fetch(&self, kind: StreamKind, key: &InstrumentKey) -> Result<Tick> {
        let url = format!("{}/midpoint?token_id={}", self.api_url, key);
        let response: MidpointResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mid = Decimal::from_str(&response.mid)
            .map_err(|e| Error::Connection(format!("bad midpoint {}: {e}", response.mid)))?;
        Ok(Tick {
            kind,
            key: key.clone(),
            payload: TickPayload::Trade { price: mid },
            ts: chrono::Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_book_event_to_quote() {
        let mut stream = PolymarketStream::new("wss://example");
        stream.parse_frame(
            r#"{
                "event_type": "book",
                "asset_id": "tok-1",
                "bids": [{"price": "0.38", "size": "100"}, {"price": "0.40", "size": "50"}],
                "asks": [{"price": "0.43", "size": "80"}, {"price": "0.45", "size": "10"}]
            }"#,
        );

        let tick = stream.pending.pop_front().unwrap();
        assert_eq!(tick.key, InstrumentKey::new("tok-1"));
        assert_eq!(
            tick.payload,
            TickPayload::Quote {
                bid: dec!(0.40),
                ask: dec!(0.43),
            }
        );
    }

    #[test]
    fn parses_last_trade_event() {
        let mut stream = PolymarketStream::new("wss://example");
        stream.parse_frame(r#"{"event_type": "last_trade_price", "asset_id": "tok-1", "price": "0.41"}"#);

        let tick = stream.pending.pop_front().unwrap();
        assert_eq!(tick.payload, TickPayload::Trade { price: dec!(0.41) });
    }

    #[test]
    fn parses_event_array() {
        let mut stream = PolymarketStream::new("wss://example");
        stream.parse_frame(
            r#"[
                {"event_type": "last_trade_price", "asset_id": "a", "price": "0.10"},
                {"event_type": "last_trade_price", "asset_id": "b", "price": "0.20"}
            ]"#,
        );
        assert_eq!(stream.pending.len(), 2);
    }

    #[test]
    fn unknown_events_are_skipped() {
        let mut stream = PolymarketStream::new("wss://example");
        stream.parse_frame(r#"{"event_type": "tick_size_change", "asset_id": "a"}"#);
        assert!(stream.pending.is_empty());
    }

    #[test]
    fn malformed_frames_do_not_panic() {
        let mut stream = PolymarketStream::new("wss://example");
        stream.parse_frame("not json at all");
        stream.parse_frame(r#"{"event_type": "book", "asset_id": "a"}"#);
        assert!(stream.pending.is_empty());
    }

    #[test]
    fn book_with_empty_side_yields_no_quote() {
        let mut stream = PolymarketStream::new("wss://example");
        stream.parse_frame(
            r#"{"event_type": "book", "asset_id": "a", "bids": [], "asks": [{"price": "0.5", "size": "1"}]}"#,
        );
        assert!(stream.pending.is_empty());
    }
}
