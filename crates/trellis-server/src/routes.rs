use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{debug, info, warn};
use trellis_html::{render_document, CallbackRegistry, HtmlRenderer, HydrationState};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::page::{document, Counter, CounterPage};

const PAGE_TITLE: &str = "Trellis counter";

/// Shared state behind every route.
pub struct AppState {
    registry: Arc<CallbackRegistry>,
    renderer: HtmlRenderer,
    counter: Counter,
    retained: Mutex<VecDeque<Vec<String>>>,
    retained_pages: usize,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            registry: Arc::new(CallbackRegistry::new()),
            renderer: HtmlRenderer::new().with_yield_every(config.yield_every),
            counter: Counter::new(),
            retained: Mutex::new(VecDeque::new()),
            retained_pages: config.retained_pages.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    pub fn counter(&self) -> &Counter {
        &self.counter
    }

    /// Remembers one page's callback ids, discarding the oldest page once
    /// more than `retained_pages` are held.
    fn track_page(&self, ids: Vec<String>) {
        let mut retained = self.retained.lock().unwrap_or_else(PoisonError::into_inner);
        retained.push_back(ids);
        while retained.len() > self.retained_pages {
            if let Some(stale) = retained.pop_front() {
                let dropped = self.registry.discard(&stale);
                debug!(dropped, "discarded callbacks of a stale page");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CallbackReply {
    pub action: &'static str,
    pub status: &'static str,
}

impl CallbackReply {
    pub const EXECUTED: Self = Self {
        action: "reload",
        status: "ok",
    };
    pub const MISSING: Self = Self {
        action: "noop",
        status: "missing",
    };
    pub const MISSING_ID: Self = Self {
        action: "error",
        status: "missing-id",
    };
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/callback", post(callback_without_id))
        .route("/callback/", post(callback_without_id))
        .route("/callback/{id}", post(callback))
        .with_state(state)
}

pub async fn index(State(app): State<Arc<AppState>>) -> Result<Html<String>, ServerError> {
    let count = app.counter.get();
    let counter = app.counter.clone();
    let mut state = HydrationState::new();
    state.insert("count", &count)?;

    let mut page = render_document(
        move || CounterPage(count, counter.clone()),
        app.renderer,
        Arc::clone(&app.registry),
        state,
    )
    .await?;

    let ids = page.payload().callbacks.clone();
    app.registry.retain(page.take_callbacks());
    debug!(callbacks = ids.len(), count, "page rendered");
    app.track_page(ids);
    Ok(Html(document(PAGE_TITLE, &page.html())))
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn callback(
    State(app): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<CallbackReply>) {
    let Ok(id) = CallbackRegistry::validate_id(&id) else {
        return callback_without_id().await;
    };
    if app.registry.execute_callback(id) {
        info!(%id, "callback executed");
        (StatusCode::OK, Json(CallbackReply::EXECUTED))
    } else {
        warn!(%id, "callback not found");
        (StatusCode::NOT_FOUND, Json(CallbackReply::MISSING))
    }
}

pub async fn callback_without_id() -> (StatusCode, Json<CallbackReply>) {
    (StatusCode::BAD_REQUEST, Json(CallbackReply::MISSING_ID))
}

#[cfg(test)]
#[path = "tests/routes_tests.rs"]
mod tests;
