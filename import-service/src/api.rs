use axum::{
    extract::{Query, State},
    http::{header::CONTENT_TYPE, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use shared::ApiError;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use crate::storage::{upload_path, UploadSigner, CSV_CONTENT_TYPE};

const UPLOAD_CONTENT_TYPE: HeaderName = HeaderName::from_static("x-upload-content-type");

#[derive(Clone)]
pub struct AppState {
    pub signer: Arc<dyn UploadSigner>,
    pub url_expiry: Duration,
}

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    pub name: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/import", get(import_products_file))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

/// Returns a presigned PUT URL for `uploaded/<name>` as a plain-text body.
pub async fn import_products_file(
    State(state): State<AppState>,
    Query(query): Query<ImportQuery>,
) -> Result<Response, ApiError> {
    let Some(file_name) = query.name else {
        return Err(ApiError::validation("Missing required query parameter: name"));
    };

    if !file_name.ends_with(".csv") {
        return Err(ApiError::validation("Invalid file format. Only CSV files are allowed."));
    }

    let path = upload_path(&file_name)
        .map_err(|e| ApiError::validation(format!("Invalid file name: {}", e)))?;

    let url = state
        .signer
        .presign_put(&path, state.url_expiry)
        .await
        .map_err(|e| ApiError::upstream("Error generating pre-signed URL", e))?;

    info!("Issued upload URL for {}", path);

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8")),
            (UPLOAD_CONTENT_TYPE, HeaderValue::from_static(CSV_CONTENT_TYPE)),
        ],
        url,
    )
        .into_response())
}

pub async fn health_check() -> &'static str {
    "OK"
}
