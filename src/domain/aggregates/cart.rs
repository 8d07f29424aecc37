//! Cart Aggregate

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::domain::ids::{CartId, CartItemId, ProductId, UserId};
use crate::domain::value_objects::{Price, Quantity};

/// A user's cart joined with the current catalog price of every line.
#[derive(Clone, Debug, Serialize)]
pub struct Cart {
    pub id: CartId,
    pub user_id: UserId,
    pub items: Vec<CartLine>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CartLine {
    pub id: CartItemId,
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Price,
    pub quantity: Quantity,
    pub image_url: Option<String>,
}

impl CartLine {
    pub fn line_total(&self) -> Result<Decimal, CartError> { self.unit_price.times(self.quantity).ok_or(CartError::AmountOverflow) }
}

impl Cart {
    pub fn empty(id: CartId, user_id: UserId) -> Self { Self { id, user_id, items: vec![] } }

    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn line(&self, product_id: ProductId) -> Option<&CartLine> { self.items.iter().find(|l| l.product_id == product_id) }
    pub fn total_quantity(&self) -> i64 { self.items.iter().map(|l| i64::from(l.quantity.value())).sum() }
    pub fn subtotal(&self) -> Result<Decimal, CartError> {
        self.items.iter().try_fold(Decimal::ZERO, |acc, line| acc.checked_add(line.line_total()?).ok_or(CartError::AmountOverflow))
    }
}

/// Raw cart row as persisted, before joining product data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CartEntry {
    pub id: CartItemId,
    pub product_id: ProductId,
    pub quantity: Quantity,
}

/// Outcome of an add-to-cart upsert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineChange { Created, Incremented }

/// Upsert: increments the existing line for `product_id`, else appends one.
pub fn add_entry(entries: &mut Vec<CartEntry>, product_id: ProductId, quantity: Quantity) -> Result<(CartItemId, LineChange), CartError> {
    if let Some(existing) = entries.iter_mut().find(|e| e.product_id == product_id) {
        existing.quantity = existing.quantity.add(quantity).map_err(|_| CartError::QuantityOverflow)?;
        return Ok((existing.id, LineChange::Incremented));
    }
    let id = CartItemId::generate();
    entries.push(CartEntry { id, product_id, quantity });
    Ok((id, LineChange::Created))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("cart not found")]
    CartNotFound,
    #[error("cart item not found")]
    ItemNotFound,
    #[error("cart item quantity is too large")]
    QuantityOverflow,
    #[error("cart total is too large")]
    AmountOverflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qty(n: i64) -> Quantity { Quantity::new(n).unwrap() }

    #[test]
    fn upsert_merges_lines() {
        let mut entries = vec![];
        let p1 = ProductId::generate();
        let (first, change) = add_entry(&mut entries, p1, qty(2)).unwrap();
        assert_eq!(change, LineChange::Created);
        let (again, change) = add_entry(&mut entries, p1, qty(3)).unwrap();
        assert_eq!(change, LineChange::Incremented);
        assert_eq!(first, again);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].quantity.value(), 5);

        add_entry(&mut entries, ProductId::generate(), qty(1)).unwrap();
        assert_eq!(entries.len(), 2);

        entries[0].quantity = qty(i64::from(i32::MAX));
        assert_eq!(add_entry(&mut entries, p1, qty(1)), Err(CartError::QuantityOverflow));
    }

    #[test]
    fn totals() {
        let mut cart = Cart::empty(CartId::generate(), UserId::generate());
        assert!(cart.is_empty());
        assert_eq!(cart.subtotal(), Ok(Decimal::ZERO));
        cart.items = vec![line(Decimal::from(10), 2), line(Decimal::from(250), 3)];
        assert_eq!(cart.total_quantity(), 5);
        assert_eq!(cart.items[1].line_total(), Ok(Decimal::from(750)));
        assert_eq!(cart.subtotal(), Ok(Decimal::from(770)));
    }

    #[test]
    fn largest_lines_still_total() {
        let big = i64::from(i32::MAX);
        let mut cart = Cart::empty(CartId::generate(), UserId::generate());
        cart.items = vec![line(Price::MAX, big), line(Price::MAX, big)];
        let each = Price::MAX * Decimal::from(big);
        assert_eq!(cart.items[0].line_total(), Ok(each));
        assert_eq!(cart.subtotal(), Ok(each + each));
    }

    fn line(price: Decimal, n: i64) -> CartLine {
        CartLine {
            id: CartItemId::generate(), product_id: ProductId::generate(), name: "Widget".into(),
            unit_price: Price::new(price).unwrap(), quantity: qty(n), image_url: None,
        }
    }
}
