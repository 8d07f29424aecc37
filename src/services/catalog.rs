//! Categories and products.

use rust_decimal::Decimal;

use crate::domain::aggregates::{Category, Product, ProductDraft, ProductRemoval};
use crate::domain::ids::{CategoryId, ProductId, UserId};
use crate::domain::value_objects::Price;
use crate::error::{AppError, Result};
use crate::services::events::EventPublisher;
use crate::store::{ProductFilter, Store, StoreError};

/// Unvalidated product fields as submitted.
#[derive(Debug, Clone)]
pub struct ProductInput {
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub category_id: CategoryId,
    pub images: Vec<String>,
}

pub struct CatalogService<'a> {
    store: &'a dyn Store,
    events: &'a EventPublisher,
}

impl<'a> CatalogService<'a> {
    pub fn new(store: &'a dyn Store, events: &'a EventPublisher) -> Self { Self { store, events } }

    pub async fn categories(&self) -> Result<Vec<Category>> { Ok(self.store.categories().await?) }

    pub async fn create_category(&self, name: &str) -> Result<Category> {
        let name = name.trim();
        if name.is_empty() { return Err(AppError::BadRequest("category name is required".into())); }
        Ok(self.store.create_category(name).await?)
    }

    pub async fn products(&self, category: Option<CategoryId>) -> Result<Vec<Product>> {
        Ok(self.store.products(ProductFilter { category, ..Default::default() }).await?)
    }

    pub async fn owned_by(&self, user: UserId) -> Result<Vec<Product>> {
        Ok(self.store.products(ProductFilter { owner: Some(user), ..Default::default() }).await?)
    }

    pub async fn product(&self, id: ProductId) -> Result<Product> {
        Ok(self.store.product(id).await?.ok_or(StoreError::NotFound("product"))?)
    }

    async fn draft(&self, input: ProductInput) -> Result<ProductDraft> {
        let price = Price::new(input.price)?;
        let draft = ProductDraft::new(&input.name, &input.description, price, input.category_id, input.images)?;
        if self.store.category(draft.category_id).await?.is_none() {
            return Err(AppError::BadRequest("category does not exist".into()));
        }
        Ok(draft)
    }

    pub async fn create_product(&self, owner: UserId, input: ProductInput) -> Result<Product> {
        let draft = self.draft(input).await?;
        let product = self.store.create_product(owner, draft).await?;
        tracing::info!(product_id = %product.id, images = product.images.len(), "product created");
        Ok(product)
    }

    pub async fn update_product(&self, user: UserId, id: ProductId, input: ProductInput) -> Result<Product> {
        self.product(id).await?.ensure_owned_by(user).inspect_err(|_| {
            tracing::warn!(product_id = %id, user_id = %user, "update of foreign product rejected");
        })?;
        let draft = self.draft(input).await?;
        Ok(self.store.update_product(id, draft).await?)
    }

    pub async fn delete_product(&self, user: UserId, id: ProductId) -> Result<ProductRemoval> {
        self.product(id).await?.ensure_owned_by(user).inspect_err(|_| {
            tracing::warn!(product_id = %id, user_id = %user, "delete of foreign product rejected");
        })?;
        let removal = self.store.delete_product(id).await?;
        tracing::info!(
            product_id = %id,
            cart_items_removed = removal.cart_items_removed,
            images_removed = removal.images_removed,
            "product deleted"
        );
        self.events.publish(removal.into()).await;
        Ok(removal)
    }
}
