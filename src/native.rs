use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Settings;
use crate::handler::{
    handle_history, handle_ingest, handle_map, handle_set_code, parse_count, HandleError,
    IngestParams, Reply, ROBOTS_TXT,
};
use crate::store::{Clock, KvCache, MemoryKv, RecordStore, SystemClock};

/// Initialize tracing subscriber for native (non-WASM) builds.
/// Uses RUST_LOG env var for filtering (defaults to info).
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().flatten_event(true)).init();
    } else {
        registry.with(fmt::layer().with_ansi(true)).init();
    }
}

pub struct AppState<K, C> {
    pub store: RecordStore<K, C>,
    pub settings: Settings,
}

type Shared<K, C> = State<Arc<AppState<K, C>>>;

/// Router backed by an in-process cache.
pub fn build_router(settings: Settings) -> Router {
    let store = RecordStore::new(MemoryKv::new(), SystemClock, settings.max_entries);
    build_router_with_store(store, settings)
}

pub fn build_router_with_store<K, C>(store: RecordStore<K, C>, settings: Settings) -> Router
where
    K: KvCache + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    let state = Arc::new(AppState { store, settings });

    Router::new()
        .route("/receiver.cgi", get(ingest_axum::<K, C>))
        .route("/robots.txt", get(|| async { text_response(ROBOTS_TXT) }))
        .route("/health", get(|| async { "ok" }))
        .route("/:device_id/json.get", get(history_axum::<K, C>))
        .route("/:device_id/setcode/:code", get(set_code_axum::<K, C>))
        .route(
            "/:device_id/:pass_code/json.get",
            get(history_with_passcode_axum::<K, C>),
        )
        .route("/:device_id/:pass_code/map.get", get(map_axum::<K, C>))
        .route(
            "/:device_id/:pass_code/setcode/:code",
            get(set_code_with_passcode_axum::<K, C>),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    n: Option<String>,
}

fn text_response(body: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body.into(),
    )
        .into_response()
}

fn into_axum(result: Result<Reply, HandleError>, debug: bool) -> Response {
    match result {
        Ok(Reply::Text(body)) => text_response(body),
        Ok(Reply::Redirect(location)) => {
            (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
        }
        Err(e) => {
            let reply = e.to_reply(debug);
            let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::OK);
            (
                status,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                reply.body,
            )
                .into_response()
        }
    }
}

async fn ingest_axum<K, C>(
    State(state): Shared<K, C>,
    Query(params): Query<IngestParams>,
) -> Response
where
    K: KvCache + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    let result = handle_ingest(params, &state.store, &state.settings).await;
    into_axum(result, state.settings.debug)
}

async fn history_axum<K, C>(
    State(state): Shared<K, C>,
    Path(device_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Response
where
    K: KvCache + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    let count = parse_count(params.n.as_deref());
    let result = handle_history(&device_id, None, count, &state.store, &state.settings).await;
    into_axum(result, state.settings.debug)
}

async fn history_with_passcode_axum<K, C>(
    State(state): Shared<K, C>,
    Path((device_id, pass_code)): Path<(String, String)>,
    Query(params): Query<HistoryParams>,
) -> Response
where
    K: KvCache + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    let count = parse_count(params.n.as_deref());
    let result = handle_history(
        &device_id,
        Some(&pass_code),
        count,
        &state.store,
        &state.settings,
    )
    .await;
    into_axum(result, state.settings.debug)
}

async fn map_axum<K, C>(
    State(state): Shared<K, C>,
    Path((device_id, pass_code)): Path<(String, String)>,
) -> Response
where
    K: KvCache + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    let result = handle_map(&device_id, &pass_code, &state.store, &state.settings).await;
    into_axum(result, state.settings.debug)
}

async fn set_code_axum<K, C>(
    State(state): Shared<K, C>,
    Path((device_id, code)): Path<(String, String)>,
) -> Response
where
    K: KvCache + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    let result = handle_set_code(&device_id, None, &code, &state.store, &state.settings).await;
    into_axum(result, state.settings.debug)
}

async fn set_code_with_passcode_axum<K, C>(
    State(state): Shared<K, C>,
    Path((device_id, pass_code, code)): Path<(String, String, String)>,
) -> Response
where
    K: KvCache + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    let result = handle_set_code(
        &device_id,
        Some(&pass_code),
        &code,
        &state.store,
        &state.settings,
    )
    .await;
    into_axum(result, state.settings.debug)
}
