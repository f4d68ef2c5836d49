use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::codec;
use crate::error::StrataError;
use crate::import::{DocumentMetadata, ImportJob, ImportPool};
use crate::index::DocumentIndex;
use crate::render::{RenderContext, Renderer};

/// Everything a request handler needs. The pool and renderer are shared; the
/// index is the only mutable part.
pub struct AppState {
    pub pool: ImportPool,
    pub renderer: Renderer,
    pub index: Mutex<DocumentIndex>,
    pub context: RenderContext,
}

impl AppState {
    pub fn new(pool: ImportPool, renderer: Renderer, context: RenderContext) -> Self {
        Self { pool, renderer, index: Mutex::new(DocumentIndex::new()), context }
    }
}

#[derive(Deserialize)]
pub struct RenderRequest {
    pub path: String,
    pub contents: String,
    #[serde(default = "expand_by_default")]
    pub expand: bool,
}

fn expand_by_default() -> bool {
    true
}

#[derive(Serialize)]
pub struct RenderResponse {
    pub path: String,
    pub status: String,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct TaggedResponse {
    pub tag: String,
    pub paths: Vec<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    Router::new()
        .route("/v1/render", post(render_document))
        .route("/v1/tagged/:tag", get(tagged_documents))
        .layer(cors)
        .with_state(state)
}

fn error_status(error: &StrataError) -> StatusCode {
    match error {
        StrataError::Parse { .. } => StatusCode::BAD_REQUEST,
        StrataError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        StrataError::PoolClosed | StrataError::Abandoned { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn render_document(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RenderRequest>,
) -> (StatusCode, Json<RenderResponse>) {
    let started = Instant::now();
    let metadata = DocumentMetadata { size: req.contents.len() as u64, ..DocumentMetadata::default() };
    let result = state.pool.import(ImportJob::new(req.path, req.contents, metadata)).await;
    let path = result.path;
    match result.value {
        Ok(value) => {
            let encoded = codec::encode(&value).ok().map(codec::TransferEncoding::into_json);
            let element = state.renderer.render_to_element(&value, &path, &state.context, req.expand).await;
            let (id, created) = state.index.lock().await.insert(&path, value);
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            info!(%path, id, created, ms = elapsed_ms, "render complete");
            let body = RenderResponse {
                path,
                status: "ok".into(),
                elapsed_ms,
                html: Some(element.to_html()),
                value: encoded,
                error: None,
            };
            (StatusCode::OK, Json(body))
        }
        Err(e) => {
            let status = error_status(&e);
            let msg = e.to_string();
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            warn!(%path, %msg, code = status.as_u16(), "render error");
            let body = RenderResponse { path, status: "error".into(), elapsed_ms, html: None, value: None, error: Some(msg) };
            (status, Json(body))
        }
    }
}

async fn tagged_documents(State(state): State<Arc<AppState>>, Path(tag): Path<String>) -> Json<TaggedResponse> {
    let paths = state.index.lock().await.tagged(&tag);
    Json(TaggedResponse { tag, paths })
}
