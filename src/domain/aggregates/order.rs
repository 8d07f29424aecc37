//! Order Aggregate
//!
//! Order lifecycle:
//!
//! ```text
//! pending -> paid -> processing -> shipped -> delivered
//!    \________\__________\____________\-----> cancelled
//! ```
//!
//! `delivered` and `cancelled` are terminal.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::aggregates::cart::Cart;
use crate::domain::aggregates::user::Address;
use crate::domain::ids::{AddressId, OrderId, OrderItemId, PaymentId, ProductId, UserId};
use crate::domain::value_objects::{Price, Quantity};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { Pending, Paid, Processing, Shipped, Delivered, Cancelled }

impl OrderStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub const fn is_terminal(self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }

    pub fn can_transition_to(self, next: Self) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Pending, Paid) | (Paid, Processing) | (Processing, Shipped) | (Shipped, Delivered) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn transition(self, next: Self) -> Result<Self, OrderError> {
        if self.can_transition_to(next) { Ok(next) } else { Err(OrderError::IllegalTransition { from: self, to: next }) }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus { #[default] Pending, Completed, Failed }

impl PaymentStatus {
    pub const fn as_str(self) -> &'static str {
        match self { Self::Pending => "pending", Self::Completed => "completed", Self::Failed => "failed" }
    }
}

impl FromStr for PaymentStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

/// Flat shipping surcharge waived once the subtotal exceeds `free_over`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShippingPolicy { pub fee: Decimal, pub free_over: Decimal }

impl Default for ShippingPolicy {
    fn default() -> Self { Self { fee: Decimal::from(100), free_over: Decimal::from(1000) } }
}

impl ShippingPolicy {
    pub fn shipping_for(&self, subtotal: Decimal) -> Decimal {
        if subtotal > self.free_over { Decimal::ZERO } else { self.fee }
    }

    /// Totals above [`Price::MAX`] cannot be stored and are rejected.
    pub fn quote(&self, cart: &Cart) -> Result<Quote, OrderError> {
        let subtotal = cart.subtotal().map_err(|_| OrderError::TotalTooLarge)?;
        let shipping = self.shipping_for(subtotal);
        let total = subtotal.checked_add(shipping).filter(|t| *t <= Price::MAX).ok_or(OrderError::TotalTooLarge)?;
        Ok(Quote { subtotal, shipping, total })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Quote { pub subtotal: Decimal, pub shipping: Decimal, pub total: Decimal }

#[derive(Clone, Debug, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub total_price: Decimal,
    pub address: ShippingAddress,
    pub items: Vec<OrderItem>,
    pub payment: Option<Payment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Delivery details copied onto the order at checkout. Later edits to the
/// user's saved address do not reach it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ShippingAddress {
    pub address_id: AddressId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
}

impl From<&Address> for ShippingAddress {
    fn from(a: &Address) -> Self {
        Self {
            address_id: a.id, first_name: a.first_name.clone(), last_name: a.last_name.clone(), email: a.email.clone(),
            phone: a.phone.clone(), address: a.address.clone(), city: a.city.clone(), postal_code: a.postal_code.clone(),
        }
    }
}

/// Price and name are copied at order time and never follow later catalog edits.
#[derive(Clone, Debug, Serialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: Quantity,
    pub price: Decimal,
}

#[derive(Clone, Debug, Serialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub method: String,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn pending(order_id: OrderId, method: &str, amount: Decimal) -> Self {
        Self { id: PaymentId::generate(), order_id, method: method.to_string(), amount, status: PaymentStatus::Pending, created_at: Utc::now() }
    }

    pub fn complete(&mut self) -> Result<(), OrderError> {
        if self.status != PaymentStatus::Pending { return Err(OrderError::PaymentNotPending); }
        self.status = PaymentStatus::Completed;
        Ok(())
    }
}

/// How an order is settled at checkout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// Order stays pending; payment is recorded later.
    Deferred,
    /// Payment row is written and completed in the same unit of work.
    Simulated { method: String },
}

/// The full row graph for one checkout, computed before anything is written.
#[derive(Clone, Debug)]
pub struct OrderDraft {
    pub id: OrderId,
    pub user_id: UserId,
    pub address: ShippingAddress,
    pub status: OrderStatus,
    pub quote: Quote,
    pub items: Vec<OrderItem>,
    pub payment: Option<Payment>,
}

impl OrderDraft {
    pub fn from_cart(cart: &Cart, address: &Address, policy: &ShippingPolicy, settlement: &Settlement) -> Result<Self, OrderError> {
        if cart.is_empty() { return Err(OrderError::EmptyCart); }
        let id = OrderId::generate();
        let quote = policy.quote(cart)?;
        let items = cart
            .items
            .iter()
            .map(|line| OrderItem {
                id: OrderItemId::generate(), order_id: id, product_id: line.product_id,
                product_name: line.name.clone(), quantity: line.quantity, price: line.unit_price.amount(),
            })
            .collect();

        let mut status = OrderStatus::Pending;
        let payment = match settlement {
            Settlement::Deferred => None,
            Settlement::Simulated { method } => {
                let mut payment = Payment::pending(id, method, quote.total);
                payment.complete()?;
                status = status.transition(OrderStatus::Paid)?;
                Some(payment)
            }
        };
        Ok(Self { id, user_id: cart.user_id, address: address.into(), status, quote, items, payment })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("cart is empty")]
    EmptyCart,
    #[error("no delivery address found")]
    NoShippingAddress,
    #[error("invalid status '{0}'")]
    UnknownStatus(String),
    #[error("cannot move order from {from} to {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },
    #[error("payment already recorded for this order")]
    PaymentExists,
    #[error("payment is not pending")]
    PaymentNotPending,
    #[error("order total exceeds 9999999999.99")]
    TotalTooLarge,
    #[error("payment amount {given} does not match order total {expected}")]
    AmountMismatch { given: Decimal, expected: Decimal },
}
