//! Wire shapes for the upstream market-data WebSocket (spec.md §4.1, §6).

use serde::{Deserialize, Serialize};

use crate::model::{MarketEvent, NewsItem, Quote, Trade, UpstreamBar};

/// A subscribable data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Trades,
    Quotes,
    Bars,
    News,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Trades => "trades",
            Channel::Quotes => "quotes",
            Channel::Bars => "bars",
            Channel::News => "news",
        }
    }
}

/// One parsed inbound frame. `Control` covers auth acks and subscription
/// confirmations, which the client consumes internally rather than
/// forwarding to the tick queue.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Trade(Trade),
    Quote(Quote),
    Bar(UpstreamBar),
    News(NewsItem),
    Control(ControlFrame),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl InboundFrame {
    pub fn into_market_event(self) -> Option<MarketEvent> {
        match self {
            InboundFrame::Trade(t) => Some(MarketEvent::Trade(t)),
            InboundFrame::Quote(q) => Some(MarketEvent::Quote(q)),
            InboundFrame::Bar(b) => Some(MarketEvent::Bar(b)),
            InboundFrame::News(_) | InboundFrame::Control(_) => None,
        }
    }
}

/// Untagged envelope used to sniff the frame's shape before committing to a
/// concrete type — the provider doesn't send a consistent discriminant
/// across message kinds, so each arm is tried in turn.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawFrame {
    Trade(Trade),
    Quote(Quote),
    Bar(UpstreamBar),
    News(NewsItem),
    Control(ControlFrame),
}

impl From<RawFrame> for InboundFrame {
    fn from(raw: RawFrame) -> Self {
        match raw {
            RawFrame::Trade(t) => InboundFrame::Trade(t),
            RawFrame::Quote(q) => InboundFrame::Quote(q),
            RawFrame::Bar(b) => InboundFrame::Bar(b),
            RawFrame::News(n) => InboundFrame::News(n),
            RawFrame::Control(c) => InboundFrame::Control(c),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthFrame<'a> {
    pub action: &'a str,
    pub key: &'a str,
    pub secret: &'a str,
}

#[derive(Debug, Serialize)]
pub struct SubscribeFrame {
    pub action: &'static str,
    pub channel: &'static str,
    pub symbols: Vec<String>,
}
