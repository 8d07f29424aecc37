//! Cart handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;

use crate::domain::aggregates::{Cart, CartError, CartLine, LineChange};
use crate::domain::ids::{CartId, ProductId};
use crate::error::Result;
use crate::services::cart::CartService;
use crate::state::AppState;
use crate::web::extract::Path;
use crate::web::{CurrentUser, ValidJson};

#[derive(Debug, Serialize)]
pub struct LineView {
    #[serde(flatten)]
    pub line: CartLine,
    pub line_total: Decimal,
}

#[derive(Debug, Serialize)]
pub struct CartView {
    pub id: CartId,
    pub items: Vec<LineView>,
    pub subtotal: Decimal,
    pub total_quantity: i64,
}

impl TryFrom<Cart> for CartView {
    type Error = CartError;

    fn try_from(cart: Cart) -> Result<Self, Self::Error> {
        let subtotal = cart.subtotal()?;
        let total_quantity = cart.total_quantity();
        let items = cart
            .items
            .into_iter()
            .map(|line| Ok(LineView { line_total: line.line_total()?, line }))
            .collect::<Result<_, CartError>>()?;
        Ok(Self { id: cart.id, items, subtotal, total_quantity })
    }
}

pub async fn get_cart(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<Json<CartView>> {
    let cart = CartService::new(state.store.as_ref()).cart(user).await?;
    Ok(Json(CartView::try_from(cart)?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CartItemRequest {
    pub product_id: ProductId,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i64,
}

pub async fn add_to_cart(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidJson(req): ValidJson<CartItemRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let (line, change) = CartService::new(state.store.as_ref()).add(user, req.product_id, req.quantity).await?;
    let (status, message) = match change {
        LineChange::Created => (StatusCode::CREATED, "Item added to cart"),
        LineChange::Incremented => (StatusCode::OK, "Cart item quantity updated"),
    };
    Ok((status, Json(json!({ "message": message, "item": line }))))
}

pub async fn update_cart_item(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidJson(req): ValidJson<CartItemRequest>,
) -> Result<Json<Value>> {
    let line = CartService::new(state.store.as_ref()).set_quantity(user, req.product_id, req.quantity).await?;
    Ok(Json(json!({ "message": "Cart item updated", "item": line })))
}

pub async fn remove_cart_item(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(product_id): Path<ProductId>,
) -> Result<Json<Value>> {
    CartService::new(state.store.as_ref()).remove(user, product_id).await?;
    Ok(Json(json!({ "message": "Item removed from cart" })))
}

pub async fn clear_cart(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<StatusCode> {
    CartService::new(state.store.as_ref()).clear(user).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cart_count(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<Json<Value>> {
    let count = CartService::new(state.store.as_ref()).count(user).await?;
    Ok(Json(json!({ "count": count })))
}
