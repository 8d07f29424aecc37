//! Catalog aggregate: categories, products and their images

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::domain::ids::{CategoryId, ProductId, ProductImageId, UserId};
use crate::domain::value_objects::{ImageError, ImagePayload, Price};

pub const MAX_PRODUCT_IMAGES: usize = 5;

#[derive(Clone, Debug, Serialize)]
pub struct Category { pub id: CategoryId, pub name: String, pub created_at: DateTime<Utc> }

#[derive(Clone, Debug, Serialize)]
pub struct ProductImage { pub id: ProductImageId, pub product_id: ProductId, pub url: String, pub position: i32 }

#[derive(Clone, Debug, Serialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub price: Price,
    pub category_id: CategoryId,
    pub category_name: String,
    pub user_id: UserId,
    pub images: Vec<ProductImage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn ensure_owned_by(&self, user: UserId) -> Result<(), ProductError> {
        if self.user_id == user { Ok(()) } else { Err(ProductError::NotOwner) }
    }
    pub fn cover_image(&self) -> Option<&str> { self.images.first().map(|i| i.url.as_str()) }
}

/// Validated input for creating or replacing a product.
#[derive(Clone, Debug)]
pub struct ProductDraft {
    pub name: String,
    pub description: String,
    pub price: Price,
    pub category_id: CategoryId,
    pub images: Vec<ImagePayload>,
}

impl ProductDraft {
    pub fn new(name: &str, description: &str, price: Price, category_id: CategoryId, images: Vec<String>) -> Result<Self, ProductError> {
        let name = name.trim();
        if name.is_empty() { return Err(ProductError::MissingName); }
        if images.is_empty() || images.len() > MAX_PRODUCT_IMAGES { return Err(ProductError::ImageCount(images.len())); }
        let images = images
            .into_iter()
            .enumerate()
            .map(|(i, url)| ImagePayload::parse(url).map_err(|source| ProductError::InvalidImage { index: i + 1, source }))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { name: name.to_string(), description: description.trim().to_string(), price, category_id, images })
    }
}

/// What a cascading product delete removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ProductRemoval { pub product_id: ProductId, pub cart_items_removed: u64, pub images_removed: u64 }

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProductError {
    #[error("name is required")]
    MissingName,
    #[error("between 1 and 5 images are required, got {0}")]
    ImageCount(usize),
    #[error("image {index} {source}")]
    InvalidImage { index: usize, source: ImageError },
    #[error("you can only modify your own products")]
    NotOwner,
}
