//! HTTP API route handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use modeldepot::StoreError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct StartDownloadRequest {
    pub model_id: String,
}

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = create_api_routes(state);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .nest("/api", api)
        .layer(CorsLayer::permissive())
}

/// Create API routes
fn create_api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/catalog", get(handle_catalog))
        .route("/models", get(handle_list_models))
        .route("/models/:model_id", axum::routing::delete(handle_delete_model))
        .route("/models/:model_id/activate", post(handle_activate_model))
        .route("/downloads", get(handle_list_downloads).post(handle_start_download))
        .route("/downloads/:model_id", get(handle_get_download).delete(handle_cancel_download))
        .route("/storage", get(handle_storage))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Route Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_catalog(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let refresh = params.get("refresh").is_some_and(|v| v == "true" || v == "1");
    let snapshot = if refresh {
        state.depot.refresh_catalog().await
    } else {
        state.depot.catalog().await
    };

    let models = match params.get("tag") {
        Some(tag) => snapshot.with_tag(tag).into_iter().cloned().collect(),
        None => snapshot.entries.clone(),
    };

    (StatusCode::OK, Json(json!({
        "version": snapshot.version,
        "updated": snapshot.updated_at,
        "fetched_at": snapshot.fetched_at,
        "origin": snapshot.origin,
        "models": models,
    })))
}

async fn handle_list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.depot.scan_models().await {
        Ok(models) => {
            let active = models.iter().find(|m| m.is_active).map(|m| m.id.clone());
            (StatusCode::OK, Json(json!({ "models": models, "active": active })))
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))),
    }
}

async fn handle_delete_model(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
) -> impl IntoResponse {
    match state.depot.delete_model(&model_id).await {
        Ok(true) => (StatusCode::OK, Json(json!({ "deleted": model_id }))),
        Ok(false) => (StatusCode::NOT_FOUND, Json(json!({ "error": "Model not found" }))),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))),
    }
}

async fn handle_activate_model(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
) -> impl IntoResponse {
    match state.depot.set_active(&model_id).await {
        Ok(model) => (StatusCode::OK, Json(json!(model))),
        Err(e) if matches!(e.downcast_ref::<StoreError>(), Some(StoreError::NotFound(_))) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() })))
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))),
    }
}

async fn handle_start_download(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartDownloadRequest>,
) -> impl IntoResponse {
    match state.depot.download(&request.model_id).await {
        Ok(rx) => {
            let current = rx.borrow().clone();
            (StatusCode::ACCEPTED, Json(json!(current)))
        }
        Err(e) => (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))),
    }
}

async fn handle_list_downloads(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let downloads = state.depot.downloads().list();
    (StatusCode::OK, Json(json!({ "downloads": downloads })))
}

async fn handle_get_download(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
) -> impl IntoResponse {
    match state.depot.download_state(&model_id) {
        Some(download) => (StatusCode::OK, Json(json!(download))),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "Download not found" }))),
    }
}

async fn handle_cancel_download(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
) -> impl IntoResponse {
    if state.depot.download_state(&model_id).is_none() {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "Download not found" })));
    }
    let cancelled = state.depot.cancel(&model_id);
    (StatusCode::OK, Json(json!({ "model_id": model_id, "cancelled": cancelled })))
}

async fn handle_storage(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.depot.storage_info().await {
        Ok(info) => (StatusCode::OK, Json(json!(info))),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modeldepot::{Config, ModelDepot};

    async fn spawn_app(data_dir: &std::path::Path) -> String {
        let mut config = Config::default().with_data_dir(data_dir);
        config.catalog.sources.clear();
        let depot = Arc::new(ModelDepot::new(config).unwrap());
        let app = create_router(Arc::new(AppState { depot }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_catalog_falls_back_to_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let base = spawn_app(dir.path()).await;

        let body: serde_json::Value = reqwest::get(format!("{}/api/catalog", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["origin"]["kind"], "embedded");
        assert!(body["models"].as_array().unwrap().iter().any(|m| m["id"] == "phi2"));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let base = spawn_app(dir.path()).await;
        let client = reqwest::Client::new();

        let status = client.get(format!("{}/api/downloads/nope", base)).send().await.unwrap().status();
        assert_eq!(status, StatusCode::NOT_FOUND.as_u16());

        let status = client
            .post(format!("{}/api/downloads", base))
            .json(&json!({ "model_id": "nope" }))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, StatusCode::NOT_FOUND.as_u16());

        let status = client
            .post(format!("{}/api/models/nope/activate", base))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, StatusCode::NOT_FOUND.as_u16());
    }
}
