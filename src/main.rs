use actix_web::{middleware::Logger, web, App, HttpServer};
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;

use marketcore::{
    config::settings::Settings,
    core::Core,
    middleware::auth::Auth,
    middleware::metrics::Metrics,
    routes::{
        health::health_scope,
        history::history_scope,
        snapshot::snapshot_scope,
        stream::{candle_stream_scope, news_stream_scope},
        subscribe::{subscribe_scope, ws_manager_scope},
    },
};

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Bounded drain window for in-flight ticks on shutdown (spec.md §5).
const SHUTDOWN_DRAIN_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    init_logging();

    let settings = Settings::new().unwrap_or_else(|e| {
        eprintln!("failed to load settings: {e}");
        std::process::exit(1);
    });
    let listen_addr = settings.http_listen_addr.clone();

    PrometheusBuilder::new()
        .install()
        .unwrap_or_else(|e| log::warn!("metrics: failed to install Prometheus recorder: {e}"));

    let pg_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await
        .expect("failed to connect to postgres");

    let core = web::Data::new(Core::new(settings.clone(), pg_pool).expect("failed to initialize core"));

    if let Err(e) = core.subscriptions.rehydrate_on_start().await {
        log::error!("core: rehydrate_on_start failed: {e}");
    }
    core.spawn_workers();

    let auth_settings = settings.clone();
    let core_for_shutdown = core.clone();
    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(Metrics)
            .wrap(Auth::new(&auth_settings))
            .app_data(core.clone())
            .service(health_scope())
            .service(subscribe_scope())
            .service(ws_manager_scope())
            .service(snapshot_scope())
            .service(history_scope())
            .service(candle_stream_scope())
            .service(news_stream_scope())
    })
    .bind(parse_listen_addr(&listen_addr))?
    .run();

    let handle = server.handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;

        // spec.md §5 graceful shutdown order: stop accepting new HTTP/SSE
        // connections first, so nothing new can land while the rest of the
        // shutdown runs.
        log::info!("shutdown: no longer accepting new connections");
        handle.stop(true).await;

        log::info!("shutdown: draining tick queue (grace {SHUTDOWN_DRAIN_GRACE:?})");
        let drained = tokio::time::timeout(SHUTDOWN_DRAIN_GRACE, async {
            loop {
                let remaining = core_for_shutdown.tick_queue.drain(1024).await;
                if remaining.is_empty() {
                    break;
                }
            }
        })
        .await;
        if drained.is_err() {
            log::warn!("shutdown: tick queue drain timed out, exiting anyway");
        }

        log::info!("shutdown: closing upstream feed connection");
        core_for_shutdown.feed.shutdown().await;

        log::info!("shutdown: flushing store");
        if let Err(e) = core_for_shutdown.store.flush() {
            log::error!("shutdown: store flush failed: {e}");
        }
    });

    server.await
}

/// `HTTP_LISTEN_ADDR` is specified as e.g. `:8001`, matching the teacher's
/// upstream convention; actix wants an explicit host.
fn parse_listen_addr(addr: &str) -> (String, u16) {
    let port = addr.rsplit(':').next().and_then(|p| p.parse().ok()).unwrap_or(8001);
    let host = addr.rsplit_once(':').map(|(h, _)| h).filter(|h| !h.is_empty()).unwrap_or("0.0.0.0");
    (host.to_owned(), port)
}
