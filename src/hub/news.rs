//! News fan-out (spec.md §4.8, §4.9 share): a single broadcast room with no
//! per-symbol keying and no `is_initial` distinction — news is a pure
//! append stream.

use std::sync::Arc;

use async_trait::async_trait;
use log::error;
use tokio::sync::broadcast;

use crate::model::{NewsFrame, NewsItem};
use crate::store::CandleNewsStore;

const DEFAULT_CAPACITY: usize = 256;

/// Receives parsed news items off the feed client and makes them durable,
/// then republishes the wire frame to every subscriber.
#[async_trait]
pub trait NewsSink: Send + Sync {
    async fn on_news(&self, item: NewsItem);
}

pub struct NewsHub {
    tx: broadcast::Sender<NewsFrame>,
    store: Arc<CandleNewsStore>,
}

impl NewsHub {
    pub fn new(store: Arc<CandleNewsStore>) -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_CAPACITY);
        Self { tx, store }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NewsFrame> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NewsSink for NewsHub {
    async fn on_news(&self, item: NewsItem) {
        if let Err(e) = self.store.insert_news(&item) {
            error!("news: failed to persist item {}: {e}", item.id);
        }
        // No receivers is the common case between news bursts; the send
        // error just means nobody's listening right now.
        let _ = self.tx.send(NewsFrame::from(&item));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn item() -> NewsItem {
        NewsItem {
            id: Uuid::new_v4(),
            symbols: vec![],
            headline: "headline".into(),
            summary: None,
            source: "wire".into(),
            url: None,
            published_at: Utc::now(),
            sentiment_score: None,
            sentiment_label: None,
        }
    }

    #[tokio::test]
    async fn published_news_is_persisted_and_broadcast() {
        let store = Arc::new(CandleNewsStore::open_in_memory().unwrap());
        let hub = NewsHub::new(store.clone());
        let mut rx = hub.subscribe();

        let n = item();
        hub.on_news(n.clone()).await;

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.id, n.id);
        assert!(store.news_by_id(n.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let store = Arc::new(CandleNewsStore::open_in_memory().unwrap());
        let hub = NewsHub::new(store);
        hub.on_news(item()).await;
    }
}
