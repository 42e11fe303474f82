//! `GET /stream/{symbol}` and `GET /news/stream` (spec.md §4.8, §6): SSE
//! fan-out. Each connection owns a bounded queue; on disconnect the queue is
//! unregistered and the live attach released.

use std::sync::Arc;

use actix_web::{get, web, HttpResponse, Scope};
use futures_util::stream::unfold;
use log::debug;
use uuid::Uuid;

use crate::core::Core;
use crate::hub::{ClientQueue, Hub};
use crate::middleware::auth::AuthedUser;
use crate::model::Symbol;
use crate::subscriptions::SubscriptionManager;
use crate::utils::errors::CoreError;

/// Releases the live attach and unregisters the connection's queue when the
/// SSE response body is dropped — client disconnect, slow-consumer kill, or
/// server shutdown all go through here the same way.
struct LiveConnectionGuard {
    hub: Arc<Hub>,
    symbol: Symbol,
    conn_id: Uuid,
    subscriptions: Arc<SubscriptionManager>,
    handle: Option<crate::subscriptions::LiveHandle>,
}

impl Drop for LiveConnectionGuard {
    fn drop(&mut self) {
        self.hub.unregister(&self.symbol, self.conn_id);
        if let Some(handle) = self.handle.take() {
            let subscriptions = self.subscriptions.clone();
            tokio::spawn(async move {
                subscriptions.detach_live(handle).await;
            });
        }
        debug!("stream: connection {} for {} torn down", self.conn_id, self.symbol);
    }
}

struct SseState {
    _guard: LiveConnectionGuard,
    queue: Arc<ClientQueue>,
}

#[get("/stream/{symbol}")]
async fn candle_stream(path: web::Path<String>, _user: AuthedUser, core: web::Data<Core>) -> Result<HttpResponse, CoreError> {
    let symbol = Symbol::new(path.into_inner()).map_err(|e| CoreError::InvalidRequest(e.to_string()))?;

    let handle = core.subscriptions.attach_live(&symbol).await?;
    let (conn_id, queue) = core.hub.register(&symbol);

    let snapshot = core.aggregator.snapshot(&symbol);
    core.hub.send_initial(&symbol, conn_id, snapshot).await;

    let state = SseState {
        _guard: LiveConnectionGuard {
            hub: core.hub.clone(),
            symbol: symbol.clone(),
            conn_id,
            subscriptions: core.subscriptions.clone(),
            handle: Some(handle),
        },
        queue,
    };

    let body = unfold(state, |state| async move {
        let frame = state.queue.recv().await;
        Some((Ok::<_, actix_web::Error>(web::Bytes::from(frame.to_sse_event())), state))
    });

    Ok(HttpResponse::Ok().content_type("text/event-stream").streaming(body))
}

#[get("/news/stream")]
async fn news_stream(_user: AuthedUser, core: web::Data<Core>) -> Result<HttpResponse, CoreError> {
    let mut rx = core.news_hub.subscribe();

    let body = unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(frame) => {
                    let body = serde_json::to_string(&frame).unwrap_or_else(|_| "{}".to_string());
                    return Some((Ok::<_, actix_web::Error>(web::Bytes::from(format!("data: {body}\n\n"))), rx));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Ok(HttpResponse::Ok().content_type("text/event-stream").streaming(body))
}

pub fn candle_stream_scope() -> Scope {
    web::scope("").service(candle_stream)
}

pub fn news_stream_scope() -> Scope {
    web::scope("").service(news_stream)
}
