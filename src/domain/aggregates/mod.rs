//! Aggregates module
pub mod user;
pub mod product;
pub mod cart;
pub mod order;

pub use user::{Address, Credentials, NewAddress, NewUser, ProfileUpdate, User};
pub use product::{Category, Product, ProductDraft, ProductError, ProductImage, ProductRemoval};
pub use cart::{Cart, CartError, CartLine, LineChange};
pub use order::{
    Order, OrderDraft, OrderError, OrderItem, OrderStatus, Payment, PaymentStatus, Quote, Settlement, ShippingAddress, ShippingPolicy,
};
