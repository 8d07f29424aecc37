//! In-process store.
//!
//! Writes run against a copy of the tables that replaces the live copy only
//! when the whole unit of work succeeds. Failures can be injected at named
//! steps to exercise that rollback.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{NewPayment, PlaceOrder, ProductFilter, ShippingTarget, Store, StoreError, StoreResult};
use crate::domain::aggregates::cart::{add_entry, CartEntry};
use crate::domain::aggregates::user::resolve_shipping_address;
use crate::domain::aggregates::{
    Address, Cart, CartError, CartLine, Category, Credentials, LineChange, NewAddress, NewUser, Order, OrderDraft,
    OrderError, OrderItem, OrderStatus, Payment, Product, ProductDraft, ProductImage, ProductRemoval, ProfileUpdate,
    Quote, ShippingAddress, User,
};
use crate::domain::ids::{CartId, CategoryId, OrderId, ProductId, ProductImageId, UserId};
use crate::domain::value_objects::{Email, Price, Quantity};

/// Steps at which a test can make the store fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    RemoveCartItems,
    RemoveImages,
    RemoveProduct,
    SaveAddress,
    InsertOrder,
    InsertOrderItems,
    InsertPayment,
    ClearCart,
}

#[derive(Clone, Default)]
struct Faults(HashSet<FaultPoint>);

impl Faults {
    fn trip(&self, point: FaultPoint) -> StoreResult<()> {
        if self.0.contains(&point) { Err(StoreError::Unavailable(format!("injected failure at {point:?}"))) } else { Ok(()) }
    }
}

#[derive(Clone)]
struct UserRow { user: User, password_hash: Option<String> }

#[derive(Clone)]
struct ProductRow {
    id: ProductId,
    name: String,
    description: String,
    price: Price,
    category_id: CategoryId,
    user_id: UserId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone)]
struct CartRow { id: CartId, user_id: UserId, entries: Vec<CartEntry> }

#[derive(Clone)]
struct OrderRow {
    id: OrderId,
    user_id: UserId,
    address: ShippingAddress,
    status: OrderStatus,
    quote: Quote,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
struct Tables {
    users: Vec<UserRow>,
    addresses: Vec<Address>,
    categories: Vec<Category>,
    products: Vec<ProductRow>,
    images: Vec<ProductImage>,
    carts: Vec<CartRow>,
    orders: Vec<OrderRow>,
    order_items: Vec<OrderItem>,
    payments: Vec<Payment>,
}

impl Tables {
    fn user_mut(&mut self, id: UserId) -> StoreResult<&mut UserRow> {
        self.users.iter_mut().find(|u| u.user.id == id).ok_or(StoreError::NotFound("user"))
    }

    fn email_taken(&self, email: &Email, except: Option<UserId>) -> bool {
        self.users.iter().any(|u| &u.user.email == email && Some(u.user.id) != except)
    }

    fn user_addresses(&self, user: UserId) -> Vec<Address> {
        self.addresses.iter().filter(|a| a.user_id == user).cloned().collect()
    }

    fn insert_address(&mut self, user: UserId, new: NewAddress) -> Address {
        let first = !self.addresses.iter().any(|a| a.user_id == user);
        let is_default = new.is_default || first;
        if is_default {
            self.addresses.iter_mut().filter(|a| a.user_id == user).for_each(|a| a.is_default = false);
        }
        let address = new.into_address(user, is_default);
        self.addresses.push(address.clone());
        address
    }

    fn category_name(&self, id: CategoryId) -> String {
        self.categories.iter().find(|c| c.id == id).map(|c| c.name.clone()).unwrap_or_default()
    }

    fn product_view(&self, row: &ProductRow) -> Product {
        let mut images: Vec<ProductImage> = self.images.iter().filter(|i| i.product_id == row.id).cloned().collect();
        images.sort_by_key(|i| i.position);
        Product {
            id: row.id, name: row.name.clone(), description: row.description.clone(), price: row.price,
            category_id: row.category_id, category_name: self.category_name(row.category_id), user_id: row.user_id,
            images, created_at: row.created_at, updated_at: row.updated_at,
        }
    }

    fn replace_images(&mut self, product: ProductId, draft: &ProductDraft) -> u64 {
        let before = self.images.len();
        self.images.retain(|i| i.product_id != product);
        let removed = (before - self.images.len()) as u64;
        for (position, payload) in draft.images.iter().enumerate() {
            self.images.push(ProductImage {
                id: ProductImageId::generate(), product_id: product, url: payload.as_str().to_string(), position: position as i32,
            });
        }
        removed
    }

    fn line_view(&self, entry: &CartEntry) -> Option<CartLine> {
        let product = self.products.iter().find(|p| p.id == entry.product_id)?;
        let image_url = self.images.iter().filter(|i| i.product_id == product.id).min_by_key(|i| i.position).map(|i| i.url.clone());
        Some(CartLine {
            id: entry.id, product_id: product.id, name: product.name.clone(), unit_price: product.price,
            quantity: entry.quantity, image_url,
        })
    }

    fn cart_view(&self, row: &CartRow) -> Cart {
        Cart { id: row.id, user_id: row.user_id, items: row.entries.iter().filter_map(|e| self.line_view(e)).collect() }
    }

    fn cart_mut(&mut self, user: UserId) -> StoreResult<&mut CartRow> {
        self.carts.iter_mut().find(|c| c.user_id == user).ok_or(StoreError::Cart(CartError::CartNotFound))
    }

    fn cart_or_create(&mut self, user: UserId) -> &mut CartRow {
        let idx = match self.carts.iter().position(|c| c.user_id == user) {
            Some(idx) => idx,
            None => {
                self.carts.push(CartRow { id: CartId::generate(), user_id: user, entries: vec![] });
                self.carts.len() - 1
            }
        };
        &mut self.carts[idx]
    }

    fn order_view(&self, row: &OrderRow) -> Order {
        Order {
            id: row.id, user_id: row.user_id, status: row.status, subtotal: row.quote.subtotal,
            shipping: row.quote.shipping, total_price: row.quote.total, address: row.address.clone(),
            items: self.order_items.iter().filter(|i| i.order_id == row.id).cloned().collect(),
            payment: self.payments.iter().find(|p| p.order_id == row.id).cloned(),
            created_at: row.created_at, updated_at: row.updated_at,
        }
    }

    fn owned_order_mut(&mut self, user: UserId, id: OrderId) -> StoreResult<&mut OrderRow> {
        self.orders.iter_mut().find(|o| o.id == id && o.user_id == user).ok_or(StoreError::NotFound("order"))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    faults: RwLock<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn fail_at(&self, point: FaultPoint) { self.faults.write().await.0.insert(point); }
    pub async fn clear_faults(&self) { self.faults.write().await.0.clear(); }

    async fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T { f(&*self.tables.read().await) }

    async fn write<T>(&self, f: impl FnOnce(&mut Tables, &Faults) -> StoreResult<T>) -> StoreResult<T> {
        let faults = self.faults.read().await.clone();
        let mut live = self.tables.write().await;
        let mut tx = live.clone();
        let out = f(&mut tx, &faults)?;
        *live = tx;
        Ok(out)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, new: NewUser) -> StoreResult<User> {
        self.write(|t, _| {
            if t.email_taken(&new.email, None) { return Err(StoreError::Conflict("email is already registered".into())); }
            let now = Utc::now();
            let user = User {
                id: UserId::generate(), name: new.name, email: new.email, profile_image_url: new.profile_image_url,
                created_at: now, updated_at: now,
            };
            t.users.push(UserRow { user: user.clone(), password_hash: new.password_hash });
            if let Some(address) = new.initial_address { t.insert_address(user.id, address); }
            Ok(user)
        })
        .await
    }

    async fn user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.read(|t| t.users.iter().find(|u| u.user.id == id).map(|u| u.user.clone())).await)
    }

    async fn credentials(&self, email: &Email) -> StoreResult<Option<Credentials>> {
        Ok(self
            .read(|t| {
                t.users.iter().find(|u| &u.user.email == email).map(|u| Credentials { user: u.user.clone(), password_hash: u.password_hash.clone() })
            })
            .await)
    }

    async fn update_profile(&self, id: UserId, update: ProfileUpdate) -> StoreResult<User> {
        self.write(|t, _| {
            if let Some(email) = &update.email {
                if t.email_taken(email, Some(id)) { return Err(StoreError::Conflict("email is already taken by another user".into())); }
            }
            let row = t.user_mut(id)?;
            if let Some(name) = update.name { row.user.name = name; }
            if let Some(email) = update.email { row.user.email = email; }
            if let Some(image) = update.profile_image_url { row.user.profile_image_url = image; }
            row.user.updated_at = Utc::now();
            let user = row.user.clone();

            if update.phone.is_some() || update.address.is_some() {
                let addresses = t.user_addresses(id);
                match resolve_shipping_address(&addresses).map(|a| a.id) {
                    Some(address_id) => {
                        if let Some(a) = t.addresses.iter_mut().find(|a| a.id == address_id) {
                            if let Some(phone) = update.phone { a.phone = phone; }
                            if let Some(line) = update.address { a.address = line; }
                        }
                    }
                    None => {
                        let new = NewAddress { phone: update.phone.unwrap_or_default(), address: update.address.unwrap_or_default(), ..Default::default() };
                        t.insert_address(id, new);
                    }
                }
            }
            Ok(user)
        })
        .await
    }

    async fn set_password_hash(&self, id: UserId, hash: &str) -> StoreResult<()> {
        self.write(|t, _| {
            let row = t.user_mut(id)?;
            row.password_hash = Some(hash.to_string());
            row.user.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn addresses(&self, user: UserId) -> StoreResult<Vec<Address>> { Ok(self.read(|t| t.user_addresses(user)).await) }

    async fn add_address(&self, user: UserId, new: NewAddress) -> StoreResult<Address> {
        self.write(|t, _| Ok(t.insert_address(user, new))).await
    }

    async fn categories(&self) -> StoreResult<Vec<Category>> {
        let mut cats = self.read(|t| t.categories.clone()).await;
        cats.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(cats)
    }

    async fn category(&self, id: CategoryId) -> StoreResult<Option<Category>> {
        Ok(self.read(|t| t.categories.iter().find(|c| c.id == id).cloned()).await)
    }

    async fn create_category(&self, name: &str) -> StoreResult<Category> {
        self.write(|t, _| {
            if t.categories.iter().any(|c| c.name.eq_ignore_ascii_case(name)) {
                return Err(StoreError::Conflict(format!("category '{name}' already exists")));
            }
            let cat = Category { id: CategoryId::generate(), name: name.to_string(), created_at: Utc::now() };
            t.categories.push(cat.clone());
            Ok(cat)
        })
        .await
    }

    async fn products(&self, filter: ProductFilter) -> StoreResult<Vec<Product>> {
        Ok(self
            .read(|t| {
                t.products
                    .iter()
                    .rev()
                    .filter(|p| filter.owner.map_or(true, |o| p.user_id == o))
                    .filter(|p| filter.category.map_or(true, |c| p.category_id == c))
                    .map(|p| t.product_view(p))
                    .collect()
            })
            .await)
    }

    async fn product(&self, id: ProductId) -> StoreResult<Option<Product>> {
        Ok(self.read(|t| t.products.iter().find(|p| p.id == id).map(|p| t.product_view(p))).await)
    }

    async fn create_product(&self, owner: UserId, draft: ProductDraft) -> StoreResult<Product> {
        self.write(|t, _| {
            if !t.categories.iter().any(|c| c.id == draft.category_id) { return Err(StoreError::NotFound("category")); }
            let now = Utc::now();
            let row = ProductRow {
                id: ProductId::generate(), name: draft.name.clone(), description: draft.description.clone(), price: draft.price,
                category_id: draft.category_id, user_id: owner, created_at: now, updated_at: now,
            };
            t.replace_images(row.id, &draft);
            t.products.push(row.clone());
            Ok(t.product_view(&row))
        })
        .await
    }

    async fn update_product(&self, id: ProductId, draft: ProductDraft) -> StoreResult<Product> {
        self.write(|t, _| {
            if !t.categories.iter().any(|c| c.id == draft.category_id) { return Err(StoreError::NotFound("category")); }
            let row = t.products.iter_mut().find(|p| p.id == id).ok_or(StoreError::NotFound("product"))?;
            row.name = draft.name.clone();
            row.description = draft.description.clone();
            row.price = draft.price;
            row.category_id = draft.category_id;
            row.updated_at = Utc::now();
            let row = row.clone();
            t.replace_images(id, &draft);
            Ok(t.product_view(&row))
        })
        .await
    }

    async fn delete_product(&self, id: ProductId) -> StoreResult<ProductRemoval> {
        self.write(|t, faults| {
            if !t.products.iter().any(|p| p.id == id) { return Err(StoreError::NotFound("product")); }

            let mut cart_items_removed = 0;
            for cart in &mut t.carts {
                let before = cart.entries.len();
                cart.entries.retain(|e| e.product_id != id);
                cart_items_removed += (before - cart.entries.len()) as u64;
            }
            faults.trip(FaultPoint::RemoveCartItems)?;

            let before = t.images.len();
            t.images.retain(|i| i.product_id != id);
            let images_removed = (before - t.images.len()) as u64;
            faults.trip(FaultPoint::RemoveImages)?;

            t.products.retain(|p| p.id != id);
            faults.trip(FaultPoint::RemoveProduct)?;

            Ok(ProductRemoval { product_id: id, cart_items_removed, images_removed })
        })
        .await
    }

    async fn cart(&self, user: UserId) -> StoreResult<Cart> {
        self.write(|t, _| {
            let row = t.cart_or_create(user).clone();
            Ok(t.cart_view(&row))
        })
        .await
    }

    async fn add_to_cart(&self, user: UserId, product: ProductId, quantity: Quantity) -> StoreResult<(CartLine, LineChange)> {
        self.write(|t, _| {
            if !t.products.iter().any(|p| p.id == product) { return Err(StoreError::NotFound("product")); }
            let cart = t.cart_or_create(user);
            let (item_id, change) = add_entry(&mut cart.entries, product, quantity)?;
            let entry = cart.entries.iter().find(|e| e.id == item_id).cloned().ok_or(StoreError::Cart(CartError::ItemNotFound))?;
            let line = t.line_view(&entry).ok_or(StoreError::NotFound("product"))?;
            Ok((line, change))
        })
        .await
    }

    async fn set_cart_quantity(&self, user: UserId, product: ProductId, quantity: Quantity) -> StoreResult<CartLine> {
        self.write(|t, _| {
            let cart = t.cart_mut(user)?;
            let entry = cart.entries.iter_mut().find(|e| e.product_id == product).ok_or(StoreError::Cart(CartError::ItemNotFound))?;
            entry.quantity = quantity;
            let entry = entry.clone();
            t.line_view(&entry).ok_or(StoreError::NotFound("product"))
        })
        .await
    }

    async fn remove_from_cart(&self, user: UserId, product: ProductId) -> StoreResult<()> {
        self.write(|t, _| {
            let cart = t.cart_mut(user)?;
            let before = cart.entries.len();
            cart.entries.retain(|e| e.product_id != product);
            if cart.entries.len() == before { return Err(StoreError::Cart(CartError::ItemNotFound)); }
            Ok(())
        })
        .await
    }

    async fn clear_cart(&self, user: UserId) -> StoreResult<u64> {
        self.write(|t, _| {
            let cart = t.cart_or_create(user);
            let removed = cart.entries.len() as u64;
            cart.entries.clear();
            Ok(removed)
        })
        .await
    }

    async fn cart_quantity(&self, user: UserId) -> StoreResult<i64> {
        Ok(self.read(|t| t.carts.iter().find(|c| c.user_id == user).map_or(0, |c| t.cart_view(c).total_quantity())).await)
    }

    async fn place_order(&self, req: PlaceOrder) -> StoreResult<Order> {
        self.write(|t, faults| {
            let cart_row = t.carts.iter().find(|c| c.user_id == req.user_id).cloned().ok_or(OrderError::EmptyCart)?;
            let cart = t.cart_view(&cart_row);
            if cart.is_empty() { return Err(OrderError::EmptyCart.into()); }

            let address = match req.shipping {
                ShippingTarget::New(new) => {
                    let address = t.insert_address(req.user_id, new);
                    faults.trip(FaultPoint::SaveAddress)?;
                    address
                }
                ShippingTarget::Saved => {
                    let addresses = t.user_addresses(req.user_id);
                    resolve_shipping_address(&addresses).cloned().ok_or(OrderError::NoShippingAddress)?
                }
            };

            let draft = OrderDraft::from_cart(&cart, &address, &req.policy, &req.settlement)?;
            let now = Utc::now();
            let row = OrderRow {
                id: draft.id, user_id: draft.user_id, address: draft.address, status: draft.status, quote: draft.quote,
                created_at: now, updated_at: now,
            };
            t.orders.push(row.clone());
            faults.trip(FaultPoint::InsertOrder)?;

            t.order_items.extend(draft.items);
            faults.trip(FaultPoint::InsertOrderItems)?;

            if let Some(payment) = draft.payment {
                t.payments.push(payment);
                faults.trip(FaultPoint::InsertPayment)?;
            }

            t.cart_mut(req.user_id)?.entries.clear();
            faults.trip(FaultPoint::ClearCart)?;

            Ok(t.order_view(&row))
        })
        .await
    }

    async fn orders(&self, user: UserId) -> StoreResult<Vec<Order>> {
        Ok(self.read(|t| t.orders.iter().rev().filter(|o| o.user_id == user).map(|o| t.order_view(o)).collect()).await)
    }

    async fn order(&self, user: UserId, id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self.read(|t| t.orders.iter().find(|o| o.id == id && o.user_id == user).map(|o| t.order_view(o))).await)
    }

    async fn transition_order(&self, user: UserId, id: OrderId, to: OrderStatus) -> StoreResult<(Order, OrderStatus)> {
        self.write(|t, _| {
            let row = t.owned_order_mut(user, id)?;
            let from = row.status;
            row.status = from.transition(to)?;
            row.updated_at = Utc::now();
            let row = row.clone();
            Ok((t.order_view(&row), from))
        })
        .await
    }

    async fn record_payment(&self, user: UserId, new: NewPayment) -> StoreResult<Payment> {
        self.write(|t, faults| {
            let expected = t.owned_order_mut(user, new.order_id)?.quote.total;
            if t.payments.iter().any(|p| p.order_id == new.order_id) { return Err(OrderError::PaymentExists.into()); }
            if new.amount != expected { return Err(OrderError::AmountMismatch { given: new.amount, expected }.into()); }

            let row = t.owned_order_mut(user, new.order_id)?;
            row.status = row.status.transition(OrderStatus::Paid)?;
            row.updated_at = Utc::now();

            let mut payment = Payment::pending(new.order_id, &new.method, new.amount);
            payment.complete()?;
            t.payments.push(payment.clone());
            faults.trip(FaultPoint::InsertPayment)?;
            Ok(payment)
        })
        .await
    }

    async fn payment(&self, user: UserId, order: OrderId) -> StoreResult<Option<Payment>> {
        Ok(self
            .read(|t| {
                t.orders
                    .iter()
                    .any(|o| o.id == order && o.user_id == user)
                    .then(|| t.payments.iter().find(|p| p.order_id == order).cloned())
                    .flatten()
            })
            .await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::aggregates::{PaymentStatus, Settlement, ShippingPolicy};
    use crate::domain::value_objects::ProfileImage;

    const PNG: &str = "data:image/png;base64,aGVsbG8=";

    async fn seed_user(store: &MemoryStore, email: &str) -> UserId {
        let new = NewUser {
            name: "Buyer".into(), email: Email::parse(email).unwrap(), password_hash: None,
            profile_image_url: ProfileImage::default(),
            initial_address: Some(NewAddress { address: "1 Main St".into(), phone: "0800".into(), ..Default::default() }),
        };
        store.create_user(new).await.unwrap().id
    }

    async fn seed_product(store: &MemoryStore, owner: UserId, price: i64) -> ProductId {
        let cat = match store.categories().await.unwrap().into_iter().next() {
            Some(c) => c.id,
            None => store.create_category("Fashion").await.unwrap().id,
        };
        let draft = ProductDraft::new("NY Hat", "Stylish", Price::new(Decimal::from(price)).unwrap(), cat, vec![PNG.into(), PNG.into()]).unwrap();
        store.create_product(owner, draft).await.unwrap().id
    }

    fn qty(n: i64) -> Quantity { Quantity::new(n).unwrap() }

    fn checkout(user: UserId) -> PlaceOrder {
        PlaceOrder {
            user_id: user, shipping: ShippingTarget::Saved,
            settlement: Settlement::Simulated { method: "card".into() }, policy: ShippingPolicy::default(),
        }
    }

    #[tokio::test]
    async fn add_to_cart_increments_existing_line() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "a@example.com").await;
        let product = seed_product(&store, user, 10).await;

        let (_, change) = store.add_to_cart(user, product, qty(2)).await.unwrap();
        assert_eq!(change, LineChange::Created);
        let before = store.cart_quantity(user).await.unwrap();
        let (line, change) = store.add_to_cart(user, product, qty(3)).await.unwrap();
        assert_eq!(change, LineChange::Incremented);
        assert_eq!(line.quantity.value(), 5);
        assert_eq!(store.cart_quantity(user).await.unwrap(), before + 3);
        assert_eq!(store.cart(user).await.unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn add_to_cart_requires_product() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "a@example.com").await;
        let err = store.add_to_cart(user, ProductId::generate(), qty(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound("product")));
        assert_eq!(store.cart_quantity(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_product_cascades() {
        let store = MemoryStore::new();
        let seller = seed_user(&store, "seller@example.com").await;
        let buyer = seed_user(&store, "buyer@example.com").await;
        let product = seed_product(&store, seller, 10).await;
        store.add_to_cart(buyer, product, qty(1)).await.unwrap();
        store.add_to_cart(seller, product, qty(4)).await.unwrap();

        let removal = store.delete_product(product).await.unwrap();
        assert_eq!(removal.cart_items_removed, 2);
        assert_eq!(removal.images_removed, 2);
        assert!(store.product(product).await.unwrap().is_none());
        assert_eq!(store.cart_quantity(buyer).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_product_rolls_back_on_failure() {
        for point in [FaultPoint::RemoveCartItems, FaultPoint::RemoveImages, FaultPoint::RemoveProduct] {
            let store = MemoryStore::new();
            let seller = seed_user(&store, "seller@example.com").await;
            let buyer = seed_user(&store, "buyer@example.com").await;
            let product = seed_product(&store, seller, 10).await;
            store.add_to_cart(buyer, product, qty(2)).await.unwrap();

            store.fail_at(point).await;
            assert!(store.delete_product(product).await.is_err());
            store.clear_faults().await;

            let kept = store.product(product).await.unwrap().expect("product survives");
            assert_eq!(kept.images.len(), 2, "{point:?}");
            assert_eq!(store.cart_quantity(buyer).await.unwrap(), 2, "{point:?}");
        }
    }

    #[tokio::test]
    async fn checkout_creates_graph_and_clears_cart() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "a@example.com").await;
        let product = seed_product(&store, user, 500).await;
        store.add_to_cart(user, product, qty(3)).await.unwrap();

        let order = store.place_order(checkout(user)).await.unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.subtotal, Decimal::from(1500));
        assert_eq!(order.shipping, Decimal::ZERO);
        assert_eq!(order.total_price, Decimal::from(1500));
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.address.address, "1 Main St");
        let payment = order.payment.clone().unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.amount, Decimal::from(1500));
        assert_eq!(store.cart_quantity(user).await.unwrap(), 0);
        assert_eq!(store.payment(user, order.id).await.unwrap().unwrap().id, payment.id);
    }

    #[tokio::test]
    async fn orders_keep_the_address_they_shipped_to() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "a@example.com").await;
        let product = seed_product(&store, user, 50).await;
        store.add_to_cart(user, product, qty(1)).await.unwrap();
        let order = store.place_order(checkout(user)).await.unwrap();

        let update = ProfileUpdate { address: Some("99 Moved Ave".into()), ..Default::default() };
        store.update_profile(user, update).await.unwrap();
        assert_eq!(store.addresses(user).await.unwrap()[0].address, "99 Moved Ave");

        let stored = store.order(user, order.id).await.unwrap().unwrap();
        assert_eq!(stored.address.address, "1 Main St");
        assert_eq!(stored.address, order.address);
    }

    #[tokio::test]
    async fn checkout_on_empty_cart_writes_nothing() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "a@example.com").await;
        let err = store.place_order(checkout(user)).await.unwrap_err();
        assert!(matches!(err, StoreError::Order(OrderError::EmptyCart)));
        store.cart(user).await.unwrap();
        let err = store.place_order(checkout(user)).await.unwrap_err();
        assert!(matches!(err, StoreError::Order(OrderError::EmptyCart)));
        assert!(store.orders(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn checkout_without_address_fails() {
        let store = MemoryStore::new();
        let user = store
            .create_user(NewUser {
                name: "No Address".into(), email: Email::parse("n@example.com").unwrap(), password_hash: None,
                profile_image_url: ProfileImage::default(), initial_address: None,
            })
            .await
            .unwrap()
            .id;
        let product = seed_product(&store, user, 10).await;
        store.add_to_cart(user, product, qty(1)).await.unwrap();
        let err = store.place_order(checkout(user)).await.unwrap_err();
        assert!(matches!(err, StoreError::Order(OrderError::NoShippingAddress)));
        assert_eq!(store.cart_quantity(user).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn checkout_rolls_back_on_any_step() {
        let steps = [
            FaultPoint::SaveAddress, FaultPoint::InsertOrder, FaultPoint::InsertOrderItems,
            FaultPoint::InsertPayment, FaultPoint::ClearCart,
        ];
        for point in steps {
            let store = MemoryStore::new();
            let user = seed_user(&store, "a@example.com").await;
            let product = seed_product(&store, user, 200).await;
            store.add_to_cart(user, product, qty(2)).await.unwrap();

            store.fail_at(point).await;
            let mut req = checkout(user);
            req.shipping = ShippingTarget::New(NewAddress { address: "2 Side St".into(), ..Default::default() });
            assert!(store.place_order(req).await.is_err(), "{point:?}");

            assert!(store.orders(user).await.unwrap().is_empty(), "{point:?}");
            assert_eq!(store.cart_quantity(user).await.unwrap(), 2, "{point:?}");
            assert_eq!(store.addresses(user).await.unwrap().len(), 1, "{point:?}");
        }
    }

    #[tokio::test]
    async fn concurrent_checkouts_charge_once() {
        let store = Arc::new(MemoryStore::new());
        let user = seed_user(&store, "a@example.com").await;
        let product = seed_product(&store, user, 100).await;
        store.add_to_cart(user, product, qty(1)).await.unwrap();

        let a = tokio::spawn({ let s = store.clone(); async move { s.place_order(checkout(user)).await } });
        let b = tokio::spawn({ let s = store.clone(); async move { s.place_order(checkout(user)).await } });
        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(r, Err(StoreError::Order(OrderError::EmptyCart)))));
        assert_eq!(store.orders(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn order_items_keep_checkout_price() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "a@example.com").await;
        let product = seed_product(&store, user, 300).await;
        store.add_to_cart(user, product, qty(1)).await.unwrap();
        let order = store.place_order(checkout(user)).await.unwrap();

        let existing = store.product(product).await.unwrap().unwrap();
        let draft = ProductDraft::new(&existing.name, "", Price::new(Decimal::from(999)).unwrap(), existing.category_id, vec![PNG.into()]).unwrap();
        store.update_product(product, draft).await.unwrap();

        let reloaded = store.order(user, order.id).await.unwrap().unwrap();
        assert_eq!(reloaded.items[0].price, Decimal::from(300));
        assert_eq!(reloaded.total_price, Decimal::from(400));
    }

    #[tokio::test]
    async fn status_transitions_are_checked() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "a@example.com").await;
        let product = seed_product(&store, user, 300).await;
        store.add_to_cart(user, product, qty(1)).await.unwrap();
        let mut req = checkout(user);
        req.settlement = Settlement::Deferred;
        let order = store.place_order(req).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);

        let err = store.transition_order(user, order.id, OrderStatus::Shipped).await.unwrap_err();
        assert!(matches!(err, StoreError::Order(OrderError::IllegalTransition { .. })));

        let other = seed_user(&store, "b@example.com").await;
        let err = store.transition_order(other, order.id, OrderStatus::Cancelled).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound("order")));

        let payment = NewPayment { order_id: order.id, method: "card".into(), amount: Decimal::from(1) };
        let err = store.record_payment(user, payment).await.unwrap_err();
        assert!(matches!(err, StoreError::Order(OrderError::AmountMismatch { .. })));

        let payment = NewPayment { order_id: order.id, method: "card".into(), amount: order.total_price };
        store.record_payment(user, payment.clone()).await.unwrap();
        let err = store.record_payment(user, payment).await.unwrap_err();
        assert!(matches!(err, StoreError::Order(OrderError::PaymentExists)));

        let (updated, from) = store.transition_order(user, order.id, OrderStatus::Processing).await.unwrap();
        assert_eq!(from, OrderStatus::Paid);
        assert_eq!(updated.status, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn new_default_address_replaces_old_default() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "a@example.com").await;
        let first = store.addresses(user).await.unwrap();
        assert!(first[0].is_default);

        let added = store.add_address(user, NewAddress { address: "Office".into(), is_default: true, ..Default::default() }).await.unwrap();
        let all = store.addresses(user).await.unwrap();
        assert_eq!(all.iter().filter(|a| a.is_default).count(), 1);
        assert!(all.iter().any(|a| a.id == added.id && a.is_default));
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let store = MemoryStore::new();
        seed_user(&store, "a@example.com").await;
        let dup = NewUser {
            name: "Again".into(), email: Email::parse("A@example.com").unwrap(), password_hash: None,
            profile_image_url: ProfileImage::default(), initial_address: None,
        };
        assert!(matches!(store.create_user(dup).await, Err(StoreError::Conflict(_))));
    }
}
