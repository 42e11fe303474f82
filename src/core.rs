//! Process-wide wiring (spec.md §9, "no singletons"). `Core` is built once
//! in `main`, holds every long-lived collaborator as an explicit `Arc`, and
//! is handed to route handlers via `web::Data<Core>` — nothing here reaches
//! for a global.

use std::sync::Arc;

use sqlx::PgPool;

use crate::aggregator::Aggregator;
use crate::backfill::HistoricalBackfillClient;
use crate::config::settings::Settings;
use crate::feed::FeedClient;
use crate::hub::news::NewsHub;
use crate::hub::Hub;
use crate::queue::TickQueue;
use crate::store::CandleNewsStore;
use crate::subscriptions::SubscriptionManager;
use crate::utils::errors::CoreError;

pub struct Core {
    pub settings: Settings,
    pub store: Arc<CandleNewsStore>,
    pub tick_queue: TickQueue,
    pub aggregator: Arc<Aggregator>,
    pub feed: Arc<FeedClient>,
    pub hub: Arc<Hub>,
    pub news_hub: Arc<NewsHub>,
    pub subscriptions: Arc<SubscriptionManager>,
}

impl Core {
    pub fn new(settings: Settings, pg_pool: PgPool) -> Result<Self, CoreError> {
        let store = Arc::new(CandleNewsStore::open(&settings.store_path)?);
        let backfill = Arc::new(HistoricalBackfillClient::new(&settings));
        let hub = Arc::new(Hub::new(settings.sse_queue_capacity));
        let news_hub = Arc::new(NewsHub::new(store.clone()));
        let tick_queue = TickQueue::new(settings.tick_queue_capacity);

        let aggregator = Arc::new(Aggregator::new(store.clone(), backfill, hub.clone()));
        let feed = FeedClient::new(&settings, tick_queue.clone(), news_hub.clone());

        let subscriptions = Arc::new(SubscriptionManager::new(
            pg_pool,
            aggregator.clone(),
            feed.clone(),
            settings.max_concurrent_symbols,
        ));

        Ok(Self {
            settings,
            store,
            tick_queue,
            aggregator,
            feed,
            hub,
            news_hub,
            subscriptions,
        })
    }

    /// Spawns the aggregator loop and the feed reconnect supervisor. Called
    /// once from `main` after the HTTP server is ready to accept traffic.
    ///
    /// The aggregator is the sole owner of in-memory candle state; per
    /// spec.md §7's recovery policy its failure aborts the process rather
    /// than leaving the rest of the server running against frozen state.
    pub fn spawn_workers(&self) {
        let aggregator = self.aggregator.clone();
        let queue = self.tick_queue.clone();
        let aggregator_task = tokio::spawn(aggregator.run(queue));
        tokio::spawn(async move {
            if let Err(e) = aggregator_task.await {
                log::error!("core: aggregator worker terminated unexpectedly, aborting process: {e}");
                std::process::abort();
            }
        });

        let feed = self.feed.clone();
        tokio::spawn(feed.run());
    }
}
