use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::symbol::Symbol;

/// Immutable after creation, except for the sentiment fields which may be
/// filled exactly once via [`crate::store::CandleNewsStore::update_news_sentiment`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: Uuid,
    pub symbols: Vec<Symbol>,
    pub headline: String,
    pub summary: Option<String>,
    pub source: String,
    pub url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub sentiment_score: Option<f64>,
    pub sentiment_label: Option<String>,
}

/// The wire shape delivered to SSE subscribers (spec.md §4.8).
#[derive(Debug, Clone, Serialize)]
pub struct NewsFrame {
    pub id: Uuid,
    pub time: DateTime<Utc>,
    pub headline: String,
    pub summary: Option<String>,
    pub tickers: Vec<String>,
    pub source: String,
    pub url: Option<String>,
}

impl From<&NewsItem> for NewsFrame {
    fn from(n: &NewsItem) -> Self {
        Self {
            id: n.id,
            time: n.published_at,
            headline: n.headline.clone(),
            summary: n.summary.clone(),
            tickers: n.symbols.iter().map(|s| s.to_string()).collect(),
            source: n.source.clone(),
            url: n.url.clone(),
        }
    }
}
