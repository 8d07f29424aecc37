//! HTTP surface.

use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod accounts;
pub mod auth;
pub mod cart;
pub mod catalog;
pub mod extract;
pub mod orders;

pub use auth::CurrentUser;
pub use extract::ValidJson;

pub const SERVICE_NAME: &str = "marketplace-api";

async fn health() -> Json<Value> { Json(json!({ "status": "healthy", "service": SERVICE_NAME })) }

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/current-user", get(accounts::current_user))
        .route("/update-profile", put(accounts::update_profile))
        .route("/update-profile-image", put(accounts::update_profile_image))
        .route("/change-password", put(accounts::change_password))
        .route("/addresses", get(accounts::list_addresses).post(accounts::add_address))
        .route("/products", post(catalog::create_product))
        .route("/user/products", get(catalog::my_products))
        .route("/products/:id", put(catalog::update_product).delete(catalog::delete_product))
        .route("/cart", get(cart::get_cart).post(cart::add_to_cart).put(cart::update_cart_item).delete(cart::clear_cart))
        .route("/cart/count", get(cart::cart_count))
        .route("/cart/item/:product_id", delete(cart::remove_cart_item))
        .route("/orders", get(orders::list_orders).post(orders::create_order))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/status", put(orders::update_order_status))
        .route("/checkout", get(orders::checkout_summary).post(orders::checkout))
        .route("/checkout/order/:id", get(orders::get_order))
        .route("/payments", post(orders::create_payment))
        .route("/payments/:order_id", get(orders::get_payment));

    Router::new()
        .route("/health", get(health))
        .route("/signup", post(accounts::signup))
        .route("/signin", post(accounts::signin))
        .route("/auth/social-login", post(accounts::social_login))
        .route("/products", get(catalog::list_products))
        .route("/products/:id", get(catalog::get_product))
        .route("/categories", get(catalog::list_categories).post(catalog::create_category))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
