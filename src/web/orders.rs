//! Checkout, order and payment handlers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use crate::domain::aggregates::{NewAddress, Order, Payment};
use crate::domain::ids::OrderId;
use crate::error::{AppError, Result};
use crate::services::checkout::{CheckoutQuote, CheckoutService};
use crate::state::AppState;
use crate::web::extract::Path;
use crate::web::{CurrentUser, ValidJson};

fn service(state: &AppState) -> CheckoutService<'_> { CheckoutService::new(state.store.as_ref(), &state.events, state.shipping) }

pub async fn checkout_summary(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<Json<CheckoutQuote>> {
    Ok(Json(service(&state).quote(user).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub shipping_address: Option<NewAddress>,
    #[serde(default)]
    pub payment_method: Option<String>,
}

/// The body is optional; an empty request checks out to the saved address.
pub async fn checkout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>)> {
    let req: CheckoutRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CheckoutRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(format!("invalid request body: {e}")))?
    };
    let order = service(&state).checkout(user, req.shipping_address, req.payment_method).await?;
    Ok((StatusCode::CREATED, Json(json!({ "order": order, "message": "Order placed successfully" }))))
}

pub async fn create_order(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<(StatusCode, Json<Value>)> {
    let order = service(&state).place_order(user).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Order created successfully", "order_id": order.id, "total": order.total_price })),
    ))
}

pub async fn list_orders(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<Json<Vec<Order>>> {
    Ok(Json(service(&state).orders(user).await?))
}

pub async fn get_order(State(state): State<AppState>, CurrentUser(user): CurrentUser, Path(id): Path<OrderId>) -> Result<Json<Order>> {
    Ok(Json(service(&state).order(user, id).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct StatusRequest {
    #[validate(length(min = 1, message = "status is required"))]
    pub status: String,
}

pub async fn update_order_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<OrderId>,
    ValidJson(req): ValidJson<StatusRequest>,
) -> Result<Json<Value>> {
    let order = service(&state).update_status(user, id, &req.status).await?;
    Ok(Json(json!({ "message": "Order status updated", "status": order.status })))
}

#[derive(Debug, Deserialize, Validate)]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub amount: Decimal,
    #[serde(default)]
    pub method: Option<String>,
}

pub async fn create_payment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ValidJson(req): ValidJson<PaymentRequest>,
) -> Result<(StatusCode, Json<Payment>)> {
    let payment = service(&state).pay(user, req.order_id, req.amount, req.method).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn get_payment(State(state): State<AppState>, CurrentUser(user): CurrentUser, Path(order_id): Path<OrderId>) -> Result<Json<Payment>> {
    Ok(Json(service(&state).payment(user, order_id).await?))
}
