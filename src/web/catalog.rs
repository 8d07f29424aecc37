//! Category and product handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use crate::domain::aggregates::{Category, Product};
use crate::domain::ids::{CategoryId, ProductId};
use crate::error::Result;
use crate::services::catalog::{CatalogService, ProductInput};
use crate::state::AppState;
use crate::web::extract::{Path, Query};
use crate::web::{CurrentUser, ValidJson};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub category: Option<CategoryId>,
}

pub async fn list_products(State(state): State<AppState>, Query(p): Query<ListParams>) -> Result<Json<Vec<Product>>> {
    Ok(Json(CatalogService::new(state.store.as_ref(), &state.events).products(p.category).await?))
}

pub async fn get_product(State(state): State<AppState>, Path(id): Path<ProductId>) -> Result<Json<Product>> {
    Ok(Json(CatalogService::new(state.store.as_ref(), &state.events).product(id).await?))
}

pub async fn my_products(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<Json<Vec<Product>>> {
    Ok(Json(CatalogService::new(state.store.as_ref(), &state.events).owned_by(user).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProductRequest {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    pub category_id: CategoryId,
    #[validate(length(min = 1, max = 5, message = "between 1 and 5 images are required"))]
    pub images: Vec<String>,
}

impl From<ProductRequest> for ProductInput {
    fn from(r: ProductRequest) -> Self {
        Self { name: r.name, description: r.description, price: r.price, category_id: r.category_id, images: r.images }
    }
}

pub async fn create_product(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidJson(req): ValidJson<ProductRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let product = CatalogService::new(state.store.as_ref(), &state.events).create_product(user, req.into()).await?;
    Ok((StatusCode::CREATED, Json(json!({ "message": "Product created successfully", "product": product }))))
}

pub async fn update_product(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<ProductId>,
    ValidJson(req): ValidJson<ProductRequest>,
) -> Result<Json<Value>> {
    let product = CatalogService::new(state.store.as_ref(), &state.events).update_product(user, id, req.into()).await?;
    Ok(Json(json!({ "message": "Product updated successfully", "product": product })))
}

pub async fn delete_product(State(state): State<AppState>, CurrentUser(user): CurrentUser, Path(id): Path<ProductId>) -> Result<Json<Value>> {
    let removal = CatalogService::new(state.store.as_ref(), &state.events).delete_product(user, id).await?;
    Ok(Json(json!({ "message": "Product deleted successfully", "details": removal })))
}

pub async fn list_categories(State(state): State<AppState>) -> Result<Json<Vec<Category>>> {
    Ok(Json(CatalogService::new(state.store.as_ref(), &state.events).categories().await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CategoryRequest {
    #[validate(length(min = 1, message = "category name is required"))]
    pub name: String,
}

pub async fn create_category(State(state): State<AppState>, ValidJson(req): ValidJson<CategoryRequest>) -> Result<(StatusCode, Json<Category>)> {
    let category = CatalogService::new(state.store.as_ref(), &state.events).create_category(&req.name).await?;
    Ok((StatusCode::CREATED, Json(category)))
}
