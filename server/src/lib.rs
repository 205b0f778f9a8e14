use anyhow::{Context, Result};
use axum::{extract::{Query, State}, http::StatusCode, routing::{get, post}, Json, Router};
use search_core::{ConfigError, FeedbackConfig, FeedbackError, FeedbackNetwork, IndexStore, ScoredUrl, SearchConfig, Searcher, StoreError, UrlId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer, AllowOrigin};
use tower_http::trace::TraceLayer;

/// Upper bound on `k` accepted from clients.
const MAX_RESULTS: usize = 100;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub k: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    /// True when no query word is indexed; `results` then holds only the fallback url.
    pub no_match: bool,
    pub results: Vec<ScoredUrl>,
}

/// A user picked `selected` out of `candidates` after searching `query`.
#[derive(Deserialize)]
pub struct ClickRequest {
    pub query: String,
    pub candidates: Vec<String>,
    pub selected: String,
}

#[derive(Deserialize)]
pub struct FeedbackRequest {
    pub query: String,
    pub urls: Vec<String>,
}

#[derive(Serialize)]
pub struct FeedbackResponse {
    pub query: String,
    pub scores: Vec<ScoredUrl>,
}

#[derive(Clone)]
pub struct AppState {
    pub searcher: Arc<Searcher>,
    pub network: Arc<FeedbackNetwork>,
}

impl AppState {
    pub fn new(store: Arc<IndexStore>, network: Arc<FeedbackNetwork>, config: SearchConfig) -> Result<Self, ConfigError> {
        let searcher = Searcher::new(store, config)?.with_feedback(network.clone());
        Ok(Self { searcher: Arc::new(searcher), network })
    }
}

type ApiError = (StatusCode, String);

fn internal(e: StoreError) -> ApiError {
    tracing::error!(error = %e, "store failure");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub fn build_app(index_dir: &str, network_dir: &str, config: SearchConfig, feedback: FeedbackConfig) -> Result<Router> {
    config.validate().context("invalid search config")?;
    feedback.validate().context("invalid feedback config")?;
    let store = IndexStore::open(index_dir).with_context(|| format!("opening index at {index_dir}"))?;
    let network = FeedbackNetwork::open(network_dir, feedback)
        .with_context(|| format!("opening feedback network at {network_dir}"))?;
    Ok(router(AppState::new(Arc::new(store), Arc::new(network), config)?))
}

pub fn router(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/click", post(click_handler))
        .route("/feedback", post(feedback_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<SearchResponse>, ApiError> {
    let start = std::time::Instant::now();
    let k = params.k.unwrap_or(state.searcher.config().result_limit).clamp(1, MAX_RESULTS);
    let results = state.searcher.query_top(&params.q, k).map_err(internal)?;
    let no_match = results.first().map_or(false, ScoredUrl::is_no_match);
    let elapsed = start.elapsed();
    tracing::debug!(query = %params.q, hits = results.len(), no_match, "search");
    Ok(Json(SearchResponse { query: params.q, took_s: elapsed.as_secs_f64(), no_match, results }))
}

fn resolve_urls(store: &IndexStore, urls: &[String]) -> Result<Vec<UrlId>, ApiError> {
    urls.iter()
        .map(|u| match store.url_id(u) {
            Ok(Some(id)) => Ok(id),
            Ok(None) => Err((StatusCode::BAD_REQUEST, format!("unknown url {u}"))),
            Err(e) => Err(internal(e)),
        })
        .collect()
}

pub async fn click_handler(State(state): State<AppState>, Json(click): Json<ClickRequest>) -> Result<Json<serde_json::Value>, ApiError> {
    let store = state.searcher.store();
    let word_ids = store.resolve_query(&click.query).map_err(internal)?;
    if word_ids.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "no query word is indexed".into()));
    }
    let mut candidates = resolve_urls(store, &click.candidates)?;
    let mut seen = std::collections::HashSet::new();
    candidates.retain(|id| seen.insert(*id));
    let selected = resolve_urls(store, std::slice::from_ref(&click.selected))?[0];

    match state.network.train(&word_ids, &candidates, selected) {
        Ok(()) => {
            tracing::info!(query = %click.query, selected = %click.selected, candidates = candidates.len(), "trained on click");
            Ok(Json(serde_json::json!({ "trained": true })))
        }
        Err(FeedbackError::Store(e)) => Err(internal(e)),
        Err(e) => Err((StatusCode::BAD_REQUEST, e.to_string())),
    }
}

pub async fn feedback_handler(State(state): State<AppState>, Json(req): Json<FeedbackRequest>) -> Result<Json<FeedbackResponse>, ApiError> {
    let store = state.searcher.store();
    let word_ids = store.resolve_query(&req.query).map_err(internal)?;
    let url_ids = resolve_urls(store, &req.urls)?;
    let outputs = state.network.score(&word_ids, &url_ids).map_err(internal)?;
    let scores = req.urls.into_iter().zip(outputs).map(|(url, score)| ScoredUrl { score, url }).collect();
    Ok(Json(FeedbackResponse { query: req.query, scores }))
}
