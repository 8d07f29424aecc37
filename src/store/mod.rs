//! Persistence boundary.
//!
//! Components receive an `Arc<dyn Store>`; every method is one unit of work,
//! so anything that touches several rows commits all of it or none of it.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::aggregates::{
    Address, Cart, CartError, CartLine, Category, Credentials, LineChange, NewAddress, NewUser, Order, OrderError,
    OrderStatus, Payment, Product, ProductDraft, ProductRemoval, ProfileUpdate, Settlement, ShippingPolicy, User,
};
use crate::domain::ids::{CategoryId, OrderId, ProductId, UserId};
use crate::domain::value_objects::{Email, Quantity};

pub mod memory;
pub mod postgres;

pub use memory::{FaultPoint, MemoryStore};
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    /// The database refused a value, e.g. a number wider than its column.
    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Where a checkout ships to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShippingTarget {
    /// Default address, else the oldest one on file.
    Saved,
    /// Saved as a new address inside the checkout transaction.
    New(NewAddress),
}

#[derive(Clone, Debug)]
pub struct PlaceOrder {
    pub user_id: UserId,
    pub shipping: ShippingTarget,
    pub settlement: Settlement,
    pub policy: ShippingPolicy,
}

#[derive(Clone, Debug)]
pub struct NewPayment { pub order_id: OrderId, pub method: String, pub amount: Decimal }

#[derive(Clone, Copy, Debug, Default)]
pub struct ProductFilter { pub owner: Option<UserId>, pub category: Option<CategoryId> }

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_user(&self, new: NewUser) -> StoreResult<User>;
    async fn user(&self, id: UserId) -> StoreResult<Option<User>>;
    async fn credentials(&self, email: &Email) -> StoreResult<Option<Credentials>>;
    /// Phone/address changes land on the shipping address, created if the user has none.
    async fn update_profile(&self, id: UserId, update: ProfileUpdate) -> StoreResult<User>;
    async fn set_password_hash(&self, id: UserId, hash: &str) -> StoreResult<()>;

    async fn addresses(&self, user: UserId) -> StoreResult<Vec<Address>>;
    /// A default address clears the flag on the others; the first address is always default.
    async fn add_address(&self, user: UserId, new: NewAddress) -> StoreResult<Address>;

    async fn categories(&self) -> StoreResult<Vec<Category>>;
    async fn category(&self, id: CategoryId) -> StoreResult<Option<Category>>;
    async fn create_category(&self, name: &str) -> StoreResult<Category>;

    async fn products(&self, filter: ProductFilter) -> StoreResult<Vec<Product>>;
    async fn product(&self, id: ProductId) -> StoreResult<Option<Product>>;
    async fn create_product(&self, owner: UserId, draft: ProductDraft) -> StoreResult<Product>;
    /// Replaces fields and the whole image set.
    async fn update_product(&self, id: ProductId, draft: ProductDraft) -> StoreResult<Product>;
    /// Removes referencing cart items, images, then the product.
    async fn delete_product(&self, id: ProductId) -> StoreResult<ProductRemoval>;

    /// Get-or-create.
    async fn cart(&self, user: UserId) -> StoreResult<Cart>;
    async fn add_to_cart(&self, user: UserId, product: ProductId, quantity: Quantity) -> StoreResult<(CartLine, LineChange)>;
    async fn set_cart_quantity(&self, user: UserId, product: ProductId, quantity: Quantity) -> StoreResult<CartLine>;
    async fn remove_from_cart(&self, user: UserId, product: ProductId) -> StoreResult<()>;
    async fn clear_cart(&self, user: UserId) -> StoreResult<u64>;
    /// Zero when the user has no cart; never creates one.
    async fn cart_quantity(&self, user: UserId) -> StoreResult<i64>;

    /// Address, order, items, payment and cart clear in one transaction,
    /// with the cart locked against a concurrent checkout.
    async fn place_order(&self, req: PlaceOrder) -> StoreResult<Order>;
    /// Newest first.
    async fn orders(&self, user: UserId) -> StoreResult<Vec<Order>>;
    async fn order(&self, user: UserId, id: OrderId) -> StoreResult<Option<Order>>;
    /// Returns the updated order and the status it left.
    async fn transition_order(&self, user: UserId, id: OrderId, to: OrderStatus) -> StoreResult<(Order, OrderStatus)>;
    /// Writes a completed payment and moves the order to paid.
    async fn record_payment(&self, user: UserId, payment: NewPayment) -> StoreResult<Payment>;
    async fn payment(&self, user: UserId, order: OrderId) -> StoreResult<Option<Payment>>;
}
