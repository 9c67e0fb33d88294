use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{ApiError, IngestionMessage};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use crate::models::{CatalogEntry, NewProduct, NewStock, ProductView};
use crate::store::{writes_for, CatalogStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CatalogStore>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductResponse {
    pub data: ProductView,
    pub status_code: u16,
}

/// Price and count may arrive as JSON numbers or strings.
#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub title: Option<Value>,
    pub description: Option<Value>,
    pub price: Option<Value>,
    pub count: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct CreateProductResponse {
    pub message: String,
    pub product: NewProduct,
    pub stock: NewStock,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/products", get(get_products_list).post(create_product))
        .route("/products/", get(get_product_by_id))
        .route("/products/:product_id", get(get_product_by_id))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn get_products_list(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProductView>>, ApiError> {
    let products = state
        .store
        .list_products()
        .await
        .map_err(|e| ApiError::upstream("Internal server error", e))?;

    info!("Fetched {} products", products.len());
    Ok(Json(products))
}

pub async fn get_product_by_id(
    State(state): State<AppState>,
    product_id: Option<Path<String>>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product_id = product_id
        .map(|Path(id)| id)
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::validation("Bad Request: Missing productId parameter"))?;

    // Ids are opaque to callers: anything that is not a UUID is simply unknown.
    let Ok(id) = Uuid::parse_str(&product_id) else {
        return Err(ApiError::product_not_found(product_id));
    };

    let product = state
        .store
        .find_product(id)
        .await
        .map_err(|e| ApiError::upstream("Internal server error", e))?
        .ok_or_else(|| ApiError::product_not_found(product_id))?;

    info!("Fetched product {}", product.id);
    Ok(Json(ProductResponse {
        data: product,
        status_code: StatusCode::OK.as_u16(),
    }))
}

fn field_text(name: &str, value: Value) -> Result<String, ApiError> {
    match value {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        _ => Err(ApiError::validation(format!("{} must be a string or a number", name))),
    }
}

pub async fn create_product(
    State(state): State<AppState>,
    payload: Result<Json<CreateProductRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateProductResponse>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::validation(e.body_text()))?;

    let missing: Vec<&str> = [
        ("title", request.title.is_none()),
        ("description", request.description.is_none()),
        ("price", request.price.is_none()),
        ("count", request.count.is_none()),
    ]
    .into_iter()
    .filter_map(|(name, absent)| absent.then_some(name))
    .collect();

    let (Some(title), Some(description), Some(price), Some(count)) =
        (request.title, request.description, request.price, request.count)
    else {
        return Err(ApiError::validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )));
    };

    let message = IngestionMessage::new(
        field_text("title", title)?,
        field_text("description", description)?,
        field_text("price", price)?,
        field_text("count", count)?,
    );
    let item = message
        .validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let entry = CatalogEntry::generate(item);
    state
        .store
        .transact_write(writes_for(vec![entry.clone()]))
        .await
        .map_err(|e| ApiError::upstream("Transaction failed", e))?;

    info!("Created product {} with stock {}", entry.product.id, entry.stock.count);

    Ok((
        StatusCode::CREATED,
        Json(CreateProductResponse {
            message: "Product and stock created successfully".to_string(),
            product: entry.product,
            stock: entry.stock,
        }),
    ))
}

pub async fn health_check() -> &'static str {
    "OK"
}
