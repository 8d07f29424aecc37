//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::aggregates::{OrderStatus, ProductRemoval};
use crate::domain::ids::{OrderId, PaymentId, ProductId, UserId};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    OrderPlaced { order_id: OrderId, user_id: UserId, status: OrderStatus, total: Decimal, items: usize },
    OrderStatusChanged { order_id: OrderId, from: OrderStatus, to: OrderStatus },
    PaymentRecorded { order_id: OrderId, payment_id: PaymentId, amount: Decimal },
    ProductDeleted { product_id: ProductId, cart_items_removed: u64, images_removed: u64 },
}

impl DomainEvent {
    /// Subject suffix, appended to the configured prefix when publishing.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::OrderPlaced { .. } => "order.placed",
            Self::OrderStatusChanged { .. } => "order.status_changed",
            Self::PaymentRecorded { .. } => "payment.recorded",
            Self::ProductDeleted { .. } => "product.deleted",
        }
    }
}

impl From<ProductRemoval> for DomainEvent {
    fn from(r: ProductRemoval) -> Self {
        Self::ProductDeleted { product_id: r.product_id, cart_items_removed: r.cart_items_removed, images_removed: r.images_removed }
    }
}
