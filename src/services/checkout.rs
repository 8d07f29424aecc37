//! Checkout, orders and payments.
//!
//! Every write goes through a single store call, so an order, its items, its
//! payment and the cart clear land together or not at all. Events go out
//! after the write has committed.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::aggregates::user::resolve_shipping_address;
use crate::domain::aggregates::{Address, Cart, NewAddress, Order, OrderError, OrderStatus, Payment, Quote, Settlement, ShippingPolicy};
use crate::domain::events::DomainEvent;
use crate::domain::ids::{OrderId, UserId};
use crate::error::{AppError, Result};
use crate::services::events::EventPublisher;
use crate::store::{NewPayment, PlaceOrder, ShippingTarget, Store, StoreError};

pub const DEFAULT_PAYMENT_METHOD: &str = "card";

/// What checkout would charge right now.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutQuote {
    pub cart_items: Cart,
    #[serde(flatten)]
    pub quote: Quote,
    pub address: Option<Address>,
}

pub struct CheckoutService<'a> {
    store: &'a dyn Store,
    events: &'a EventPublisher,
    policy: ShippingPolicy,
}

impl<'a> CheckoutService<'a> {
    pub fn new(store: &'a dyn Store, events: &'a EventPublisher, policy: ShippingPolicy) -> Self { Self { store, events, policy } }

    pub async fn quote(&self, user: UserId) -> Result<CheckoutQuote> {
        let cart = self.store.cart(user).await?;
        if cart.is_empty() { return Err(OrderError::EmptyCart.into()); }
        let addresses = self.store.addresses(user).await?;
        let address = resolve_shipping_address(&addresses).cloned();
        let quote = self.policy.quote(&cart)?;
        Ok(CheckoutQuote { quote, cart_items: cart, address })
    }

    /// Places the order and settles it with a simulated payment.
    pub async fn checkout(&self, user: UserId, shipping: Option<NewAddress>, method: Option<String>) -> Result<Order> {
        let shipping = match shipping {
            Some(address) if !address.is_complete() => {
                return Err(AppError::BadRequest("shipping address requires every field".into()));
            }
            Some(address) => ShippingTarget::New(address),
            None => ShippingTarget::Saved,
        };
        let method = method.filter(|m| !m.trim().is_empty()).unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_string());
        self.place(PlaceOrder { user_id: user, shipping, settlement: Settlement::Simulated { method }, policy: self.policy }).await
    }

    /// Places the order without payment; it stays pending.
    pub async fn place_order(&self, user: UserId) -> Result<Order> {
        self.place(PlaceOrder { user_id: user, shipping: ShippingTarget::Saved, settlement: Settlement::Deferred, policy: self.policy })
            .await
    }

    async fn place(&self, req: PlaceOrder) -> Result<Order> {
        let user = req.user_id;
        let order = self.store.place_order(req).await.inspect_err(|e| {
            if let StoreError::Order(rule) = e {
                tracing::warn!(user_id = %user, reason = %rule, "checkout rejected");
            }
        })?;
        tracing::info!(
            order_id = %order.id,
            user_id = %user,
            status = %order.status,
            total = %order.total_price,
            items = order.items.len(),
            "order placed"
        );
        self.events
            .publish(DomainEvent::OrderPlaced {
                order_id: order.id,
                user_id: user,
                status: order.status,
                total: order.total_price,
                items: order.items.len(),
            })
            .await;
        if let Some(payment) = &order.payment {
            self.events.publish(DomainEvent::PaymentRecorded { order_id: order.id, payment_id: payment.id, amount: payment.amount }).await;
        }
        Ok(order)
    }

    pub async fn orders(&self, user: UserId) -> Result<Vec<Order>> { Ok(self.store.orders(user).await?) }

    pub async fn order(&self, user: UserId, id: OrderId) -> Result<Order> {
        Ok(self.store.order(user, id).await?.ok_or(StoreError::NotFound("order"))?)
    }

    pub async fn update_status(&self, user: UserId, id: OrderId, status: &str) -> Result<Order> {
        let to: OrderStatus = status.parse()?;
        if to == OrderStatus::Paid {
            return Err(AppError::BadRequest("orders become paid only by recording a payment".into()));
        }
        let (order, from) = self.store.transition_order(user, id, to).await.inspect_err(|e| {
            if let StoreError::Order(rule) = e {
                tracing::warn!(order_id = %id, reason = %rule, "status change rejected");
            }
        })?;
        tracing::info!(order_id = %id, %from, to = %order.status, "order status changed");
        self.events.publish(DomainEvent::OrderStatusChanged { order_id: id, from, to: order.status }).await;
        Ok(order)
    }

    pub async fn pay(&self, user: UserId, order_id: OrderId, amount: Decimal, method: Option<String>) -> Result<Payment> {
        let method = method.filter(|m| !m.trim().is_empty()).unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_string());
        let payment = self.store.record_payment(user, NewPayment { order_id, method, amount }).await.inspect_err(|e| {
            if let StoreError::Order(rule) = e {
                tracing::warn!(%order_id, reason = %rule, "payment rejected");
            }
        })?;
        tracing::info!(%order_id, payment_id = %payment.id, amount = %payment.amount, "payment recorded");
        self.events.publish(DomainEvent::PaymentRecorded { order_id, payment_id: payment.id, amount: payment.amount }).await;
        self.events
            .publish(DomainEvent::OrderStatusChanged { order_id, from: OrderStatus::Pending, to: OrderStatus::Paid })
            .await;
        Ok(payment)
    }

    pub async fn payment(&self, user: UserId, order_id: OrderId) -> Result<Payment> {
        Ok(self.store.payment(user, order_id).await?.ok_or(StoreError::NotFound("payment"))?)
    }
}
