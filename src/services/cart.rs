//! Cart operations. Each user has exactly one cart, created on first access.

use crate::domain::aggregates::{Cart, CartLine, LineChange};
use crate::domain::ids::{ProductId, UserId};
use crate::domain::value_objects::Quantity;
use crate::error::Result;
use crate::store::Store;

pub struct CartService<'a> {
    store: &'a dyn Store,
}

impl<'a> CartService<'a> {
    pub fn new(store: &'a dyn Store) -> Self { Self { store } }

    pub async fn cart(&self, user: UserId) -> Result<Cart> { Ok(self.store.cart(user).await?) }

    /// Upsert: a repeated product increments the existing line.
    pub async fn add(&self, user: UserId, product: ProductId, quantity: i64) -> Result<(CartLine, LineChange)> {
        let quantity = Quantity::new(quantity)?;
        let (line, change) = self.store.add_to_cart(user, product, quantity).await?;
        tracing::debug!(user_id = %user, product_id = %product, quantity = line.quantity.value(), ?change, "cart line saved");
        Ok((line, change))
    }

    pub async fn set_quantity(&self, user: UserId, product: ProductId, quantity: i64) -> Result<CartLine> {
        let quantity = Quantity::new(quantity)?;
        Ok(self.store.set_cart_quantity(user, product, quantity).await?)
    }

    pub async fn remove(&self, user: UserId, product: ProductId) -> Result<()> { Ok(self.store.remove_from_cart(user, product).await?) }

    pub async fn clear(&self, user: UserId) -> Result<u64> { Ok(self.store.clear_cart(user).await?) }

    pub async fn count(&self, user: UserId) -> Result<i64> { Ok(self.store.cart_quantity(user).await?) }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::aggregates::{NewUser, ProductDraft};
    use crate::domain::value_objects::{Email, Price, ProfileImage};
    use crate::error::AppError;
    use crate::store::MemoryStore;

    async fn fixture(store: &MemoryStore) -> (UserId, ProductId) {
        let user = store
            .create_user(NewUser {
                name: "Buyer".into(), email: Email::parse("b@example.com").unwrap(), password_hash: None,
                profile_image_url: ProfileImage::default(), initial_address: None,
            })
            .await
            .unwrap()
            .id;
        let cat = store.create_category("Books").await.unwrap();
        let draft = ProductDraft::new("Novel", "", Price::new(Decimal::from(12)).unwrap(), cat.id, vec!["data:image/png;base64,aGk=".into()]).unwrap();
        (user, store.create_product(user, draft).await.unwrap().id)
    }

    #[tokio::test]
    async fn quantities_must_be_positive() {
        let store = MemoryStore::new();
        let (user, product) = fixture(&store).await;
        let cart = CartService::new(&store);

        assert!(matches!(cart.add(user, product, 0).await, Err(AppError::BadRequest(_))));
        cart.add(user, product, 2).await.unwrap();
        assert!(matches!(cart.set_quantity(user, product, -1).await, Err(AppError::BadRequest(_))));
        assert_eq!(cart.set_quantity(user, product, 7).await.unwrap().quantity.value(), 7);
        assert_eq!(cart.count(user).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn count_does_not_create_cart() {
        let store = MemoryStore::new();
        let (user, product) = fixture(&store).await;
        let cart = CartService::new(&store);

        assert_eq!(cart.count(user).await.unwrap(), 0);
        let err = cart.remove(user, product).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);

        let fresh = cart.cart(user).await.unwrap();
        assert!(fresh.is_empty());
        cart.add(user, product, 1).await.unwrap();
        assert_eq!(cart.clear(user).await.unwrap(), 1);
        assert_eq!(cart.cart(user).await.unwrap().id, fresh.id);
    }
}
