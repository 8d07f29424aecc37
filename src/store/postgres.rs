//! PostgreSQL store.
//!
//! Rows are soft-deleted: every read filters on `deleted_at IS NULL` and every
//! delete stamps it. Multi-row operations run in one transaction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use uuid::Uuid;

use super::{NewPayment, PlaceOrder, ProductFilter, ShippingTarget, Store, StoreError, StoreResult};
use crate::domain::aggregates::user::resolve_shipping_address;
use crate::domain::aggregates::{
    Address, Cart, CartError, CartLine, Category, Credentials, LineChange, NewAddress, NewUser, Order, OrderDraft,
    OrderError, OrderItem, OrderStatus, Payment, PaymentStatus, Product, ProductDraft, ProductImage, ProductRemoval,
    ProfileUpdate, ShippingAddress, User,
};
use crate::domain::ids::{
    AddressId, CartId, CartItemId, CategoryId, OrderId, OrderItemId, PaymentId, ProductId, ProductImageId, UserId,
};
use crate::domain::value_objects::{Email, Price, PriceError, ProfileImage, Quantity};

const UNIQUE_VIOLATION: &str = "23505";
const NUMERIC_OUT_OF_RANGE: &str = "22003";

fn has_code(err: &sqlx::Error, code: &str) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(code))
}

fn price_out_of_range(err: sqlx::Error) -> StoreError {
    if has_code(&err, NUMERIC_OUT_OF_RANGE) { StoreError::Invalid(PriceError::TooLarge.to_string()) } else { err.into() }
}

fn corrupt(what: impl std::fmt::Display) -> StoreError { StoreError::Corrupt(what.to_string()) }

fn quantity(raw: i32) -> StoreResult<Quantity> { Quantity::new(i64::from(raw)).map_err(|e| corrupt(format!("quantity {raw}: {e}"))) }

fn price(raw: Decimal) -> StoreResult<Price> { Price::new(raw).map_err(|e| corrupt(format!("price {raw}: {e}"))) }

#[derive(sqlx::FromRow)]
struct UserRow {
    id: UserId,
    name: String,
    email: String,
    password_hash: Option<String>,
    profile_image_url: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for Credentials {
    type Error = StoreError;
    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| corrupt(format!("email of user {}: {e}", row.id)))?;
        let profile_image_url = ProfileImage::parse(&row.profile_image_url).map_err(|e| corrupt(format!("profile image of user {}: {e}", row.id)))?;
        let user = User { id: row.id, name: row.name, email, profile_image_url, created_at: row.created_at, updated_at: row.updated_at };
        Ok(Credentials { user, password_hash: row.password_hash })
    }
}

#[derive(sqlx::FromRow)]
struct AddressRow {
    id: AddressId,
    user_id: UserId,
    first_name: String,
    last_name: String,
    email: String,
    phone: String,
    address: String,
    city: String,
    postal_code: String,
    is_default: bool,
    created_at: DateTime<Utc>,
}

impl From<AddressRow> for Address {
    fn from(r: AddressRow) -> Self {
        Self {
            id: r.id, user_id: r.user_id, first_name: r.first_name, last_name: r.last_name, email: r.email, phone: r.phone,
            address: r.address, city: r.city, postal_code: r.postal_code, is_default: r.is_default, created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CategoryRow { id: CategoryId, name: String, created_at: DateTime<Utc> }

impl From<CategoryRow> for Category {
    fn from(r: CategoryRow) -> Self { Self { id: r.id, name: r.name, created_at: r.created_at } }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: ProductId,
    name: String,
    description: String,
    price: Decimal,
    category_id: CategoryId,
    category_name: String,
    user_id: UserId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ImageRow { id: ProductImageId, product_id: ProductId, url: String, position: i32 }

#[derive(sqlx::FromRow)]
struct LineRow { id: CartItemId, product_id: ProductId, name: String, price: Decimal, quantity: i32, image_url: Option<String> }

impl TryFrom<LineRow> for CartLine {
    type Error = StoreError;
    fn try_from(r: LineRow) -> Result<Self, Self::Error> {
        Ok(Self { id: r.id, product_id: r.product_id, name: r.name, unit_price: price(r.price)?, quantity: quantity(r.quantity)?, image_url: r.image_url })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    user_id: UserId,
    address_id: AddressId,
    ship_first_name: String,
    ship_last_name: String,
    ship_email: String,
    ship_phone: String,
    ship_address: String,
    ship_city: String,
    ship_postal_code: String,
    status: String,
    subtotal: Decimal,
    shipping: Decimal,
    total_price: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow { id: OrderItemId, order_id: OrderId, product_id: ProductId, product_name: String, quantity: i32, price: Decimal }

#[derive(sqlx::FromRow)]
struct PaymentRow { id: PaymentId, order_id: OrderId, method: String, amount: Decimal, status: String, created_at: DateTime<Utc> }

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;
    fn try_from(r: PaymentRow) -> Result<Self, Self::Error> {
        let status: PaymentStatus = r.status.parse().map_err(|e| corrupt(format!("payment {}: {e}", r.id)))?;
        Ok(Self { id: r.id, order_id: r.order_id, method: r.method, amount: r.amount, status, created_at: r.created_at })
    }
}

// Helpers take a pooled connection or an open transaction.

const USER_COLUMNS: &str = "id, name, email, password_hash, profile_image_url, created_at, updated_at";
const ADDRESS_COLUMNS: &str = "id, user_id, first_name, last_name, email, phone, address, city, postal_code, is_default, created_at";

async fn fetch_addresses(conn: &mut PgConnection, user: UserId) -> StoreResult<Vec<Address>> {
    let rows: Vec<AddressRow> = sqlx::query_as(&format!(
        "SELECT {ADDRESS_COLUMNS} FROM addresses WHERE user_id = $1 AND deleted_at IS NULL ORDER BY created_at"
    ))
    .bind(user)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(Address::from).collect())
}

async fn insert_address(conn: &mut PgConnection, user: UserId, new: NewAddress) -> StoreResult<Address> {
    let first: bool = sqlx::query_scalar("SELECT NOT EXISTS (SELECT 1 FROM addresses WHERE user_id = $1 AND deleted_at IS NULL)")
        .bind(user)
        .fetch_one(&mut *conn)
        .await?;
    let is_default = new.is_default || first;
    if is_default {
        sqlx::query("UPDATE addresses SET is_default = FALSE, updated_at = now() WHERE user_id = $1 AND is_default AND deleted_at IS NULL")
            .bind(user)
            .execute(&mut *conn)
            .await?;
    }
    let address = new.into_address(user, is_default);
    sqlx::query(
        "INSERT INTO addresses (id, user_id, first_name, last_name, email, phone, address, city, postal_code, is_default, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(address.id)
    .bind(address.user_id)
    .bind(&address.first_name)
    .bind(&address.last_name)
    .bind(&address.email)
    .bind(&address.phone)
    .bind(&address.address)
    .bind(&address.city)
    .bind(&address.postal_code)
    .bind(address.is_default)
    .bind(address.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(address)
}

async fn fetch_products(conn: &mut PgConnection, filter: ProductFilter, only: Option<ProductId>) -> StoreResult<Vec<Product>> {
    let rows: Vec<ProductRow> = sqlx::query_as(
        "SELECT p.id, p.name, p.description, p.price, p.category_id, c.name AS category_name, p.user_id, p.created_at, p.updated_at
         FROM products p JOIN categories c ON c.id = p.category_id
         WHERE p.deleted_at IS NULL
           AND ($1::uuid IS NULL OR p.user_id = $1)
           AND ($2::uuid IS NULL OR p.category_id = $2)
           AND ($3::uuid IS NULL OR p.id = $3)
         ORDER BY p.created_at DESC",
    )
    .bind(filter.owner)
    .bind(filter.category)
    .bind(only)
    .fetch_all(&mut *conn)
    .await?;

    let ids: Vec<Uuid> = rows.iter().map(|r| r.id.as_uuid()).collect();
    let images: Vec<ImageRow> = sqlx::query_as(
        "SELECT id, product_id, url, position FROM product_images
         WHERE product_id = ANY($1) AND deleted_at IS NULL ORDER BY position",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|r| {
            let images = images
                .iter()
                .filter(|i| i.product_id == r.id)
                .map(|i| ProductImage { id: i.id, product_id: i.product_id, url: i.url.clone(), position: i.position })
                .collect();
            Ok(Product {
                id: r.id, name: r.name, description: r.description, price: price(r.price)?, category_id: r.category_id,
                category_name: r.category_name, user_id: r.user_id, images, created_at: r.created_at, updated_at: r.updated_at,
            })
        })
        .collect()
}

async fn fetch_product(conn: &mut PgConnection, id: ProductId) -> StoreResult<Option<Product>> {
    Ok(fetch_products(conn, ProductFilter::default(), Some(id)).await?.into_iter().next())
}

async fn ensure_category(conn: &mut PgConnection, id: CategoryId) -> StoreResult<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM categories WHERE id = $1 AND deleted_at IS NULL)")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    if exists { Ok(()) } else { Err(StoreError::NotFound("category")) }
}

async fn write_images(conn: &mut PgConnection, product: ProductId, draft: &ProductDraft) -> StoreResult<()> {
    for (position, image) in draft.images.iter().enumerate() {
        sqlx::query("INSERT INTO product_images (id, product_id, url, position) VALUES ($1, $2, $3, $4)")
            .bind(ProductImageId::generate())
            .bind(product)
            .bind(image.as_str())
            .bind(position as i32)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn soft_delete_images(conn: &mut PgConnection, product: ProductId) -> StoreResult<u64> {
    let done = sqlx::query("UPDATE product_images SET deleted_at = now(), updated_at = now() WHERE product_id = $1 AND deleted_at IS NULL")
        .bind(product)
        .execute(&mut *conn)
        .await?;
    Ok(done.rows_affected())
}

async fn live_cart(conn: &mut PgConnection, user: UserId) -> StoreResult<Option<CartId>> {
    Ok(sqlx::query_scalar("SELECT id FROM carts WHERE user_id = $1 AND deleted_at IS NULL").bind(user).fetch_optional(&mut *conn).await?)
}

async fn cart_or_create(conn: &mut PgConnection, user: UserId) -> StoreResult<CartId> {
    sqlx::query("INSERT INTO carts (id, user_id) VALUES ($1, $2) ON CONFLICT (user_id) WHERE deleted_at IS NULL DO NOTHING")
        .bind(CartId::generate())
        .bind(user)
        .execute(&mut *conn)
        .await?;
    live_cart(conn, user).await?.ok_or(StoreError::Cart(CartError::CartNotFound))
}

const LINE_SELECT: &str = "SELECT ci.id, ci.product_id, p.name, p.price, ci.quantity,
        (SELECT url FROM product_images pi WHERE pi.product_id = p.id AND pi.deleted_at IS NULL ORDER BY pi.position LIMIT 1) AS image_url
     FROM cart_items ci JOIN products p ON p.id = ci.product_id AND p.deleted_at IS NULL";

async fn cart_lines(conn: &mut PgConnection, cart: CartId) -> StoreResult<Vec<CartLine>> {
    let rows: Vec<LineRow> = sqlx::query_as(&format!("{LINE_SELECT} WHERE ci.cart_id = $1 AND ci.deleted_at IS NULL ORDER BY ci.created_at"))
        .bind(cart)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(CartLine::try_from).collect()
}

async fn cart_line(conn: &mut PgConnection, item: CartItemId) -> StoreResult<CartLine> {
    let row: Option<LineRow> = sqlx::query_as(&format!("{LINE_SELECT} WHERE ci.id = $1 AND ci.deleted_at IS NULL"))
        .bind(item)
        .fetch_optional(&mut *conn)
        .await?;
    row.ok_or(StoreError::Cart(CartError::ItemNotFound))?.try_into()
}

async fn fetch_orders(conn: &mut PgConnection, user: UserId, only: Option<OrderId>) -> StoreResult<Vec<Order>> {
    let rows: Vec<OrderRow> = sqlx::query_as(
        "SELECT id, user_id, address_id, ship_first_name, ship_last_name, ship_email, ship_phone, ship_address, ship_city,
                ship_postal_code, status, subtotal, shipping, total_price, created_at, updated_at
         FROM orders WHERE user_id = $1 AND deleted_at IS NULL AND ($2::uuid IS NULL OR id = $2)
         ORDER BY created_at DESC",
    )
    .bind(user)
    .bind(only)
    .fetch_all(&mut *conn)
    .await?;
    if rows.is_empty() { return Ok(vec![]); }

    let order_ids: Vec<Uuid> = rows.iter().map(|r| r.id.as_uuid()).collect();
    let items: Vec<OrderItemRow> = sqlx::query_as(
        "SELECT id, order_id, product_id, product_name, quantity, price FROM order_items WHERE order_id = ANY($1) AND deleted_at IS NULL ORDER BY created_at, id",
    )
    .bind(&order_ids)
    .fetch_all(&mut *conn)
    .await?;
    let payments: Vec<PaymentRow> = sqlx::query_as(
        "SELECT id, order_id, method, amount, status, created_at FROM payments WHERE order_id = ANY($1) AND deleted_at IS NULL",
    )
    .bind(&order_ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut payments = payments.into_iter().map(Payment::try_from).collect::<StoreResult<Vec<_>>>()?;

    rows.into_iter()
        .map(|r| {
            let status: OrderStatus = r.status.parse().map_err(|e| corrupt(format!("order {}: {e}", r.id)))?;
            let address = ShippingAddress {
                address_id: r.address_id, first_name: r.ship_first_name, last_name: r.ship_last_name, email: r.ship_email,
                phone: r.ship_phone, address: r.ship_address, city: r.ship_city, postal_code: r.ship_postal_code,
            };
            let items = items
                .iter()
                .filter(|i| i.order_id == r.id)
                .map(|i| {
                    Ok(OrderItem {
                        id: i.id, order_id: i.order_id, product_id: i.product_id, product_name: i.product_name.clone(),
                        quantity: quantity(i.quantity)?, price: i.price,
                    })
                })
                .collect::<StoreResult<Vec<_>>>()?;
            let payment = payments.iter().position(|p| p.order_id == r.id).map(|i| payments.swap_remove(i));
            Ok(Order {
                id: r.id, user_id: r.user_id, status, subtotal: r.subtotal, shipping: r.shipping, total_price: r.total_price,
                address, items, payment, created_at: r.created_at, updated_at: r.updated_at,
            })
        })
        .collect()
}

async fn fetch_order(conn: &mut PgConnection, user: UserId, id: OrderId) -> StoreResult<Option<Order>> {
    Ok(fetch_orders(conn, user, Some(id)).await?.into_iter().next())
}

/// Locks the order row for the rest of the transaction.
async fn lock_order(conn: &mut PgConnection, user: UserId, id: OrderId) -> StoreResult<(OrderStatus, Decimal)> {
    let row: Option<(String, Decimal)> =
        sqlx::query_as("SELECT status, total_price FROM orders WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL FOR UPDATE")
            .bind(id)
            .bind(user)
            .fetch_optional(&mut *conn)
            .await?;
    let (status, total) = row.ok_or(StoreError::NotFound("order"))?;
    let status = status.parse().map_err(|e| corrupt(format!("order {id}: {e}")))?;
    Ok((status, total))
}

async fn set_order_status(conn: &mut PgConnection, id: OrderId, status: OrderStatus) -> StoreResult<()> {
    sqlx::query("UPDATE orders SET status = $2, updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(status.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn insert_payment(conn: &mut PgConnection, payment: &Payment) -> StoreResult<()> {
    sqlx::query("INSERT INTO payments (id, order_id, method, amount, status, created_at) VALUES ($1, $2, $3, $4, $5, $6)")
        .bind(payment.id)
        .bind(payment.order_id)
        .bind(&payment.method)
        .bind(payment.amount)
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| if has_code(&e, UNIQUE_VIOLATION) { OrderError::PaymentExists.into() } else { StoreError::from(e) })?;
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self { Self { pool } }
    pub fn pool(&self) -> &PgPool { &self.pool }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, new: NewUser) -> StoreResult<User> {
        let mut tx = self.pool.begin().await?;
        let row: UserRow = sqlx::query_as(&format!(
            "INSERT INTO users (id, name, email, password_hash, profile_image_url) VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        ))
        .bind(UserId::generate())
        .bind(&new.name)
        .bind(new.email.as_str())
        .bind(&new.password_hash)
        .bind(new.profile_image_url.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| if has_code(&e, UNIQUE_VIOLATION) { StoreError::Conflict("email is already registered".into()) } else { e.into() })?;
        let user = Credentials::try_from(row)?.user;
        if let Some(address) = new.initial_address {
            insert_address(&mut tx, user.id, address).await?;
        }
        tx.commit().await?;
        Ok(user)
    }

    async fn user(&self, id: UserId) -> StoreResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Credentials::try_from(r).map(|c| c.user)).transpose()
    }

    async fn credentials(&self, email: &Email) -> StoreResult<Option<Credentials>> {
        let row: Option<UserRow> = sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL"))
            .bind(email.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Credentials::try_from).transpose()
    }

    async fn update_profile(&self, id: UserId, update: ProfileUpdate) -> StoreResult<User> {
        let mut tx = self.pool.begin().await?;
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "UPDATE users SET name = COALESCE($2, name), email = COALESCE($3, email),
                 profile_image_url = COALESCE($4, profile_image_url), updated_at = now()
             WHERE id = $1 AND deleted_at IS NULL RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(&update.name)
        .bind(update.email.as_ref().map(Email::as_str))
        .bind(update.profile_image_url.as_ref().map(ProfileImage::as_str))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            if has_code(&e, UNIQUE_VIOLATION) { StoreError::Conflict("email is already taken by another user".into()) } else { e.into() }
        })?;
        let user = Credentials::try_from(row.ok_or(StoreError::NotFound("user"))?)?.user;

        if update.phone.is_some() || update.address.is_some() {
            let addresses = fetch_addresses(&mut tx, id).await?;
            match resolve_shipping_address(&addresses) {
                Some(target) => {
                    sqlx::query("UPDATE addresses SET phone = COALESCE($2, phone), address = COALESCE($3, address), updated_at = now() WHERE id = $1")
                        .bind(target.id)
                        .bind(&update.phone)
                        .bind(&update.address)
                        .execute(&mut *tx)
                        .await?;
                }
                None => {
                    let new = NewAddress { phone: update.phone.unwrap_or_default(), address: update.address.unwrap_or_default(), ..Default::default() };
                    insert_address(&mut tx, id, new).await?;
                }
            }
        }
        tx.commit().await?;
        Ok(user)
    }

    async fn set_password_hash(&self, id: UserId, hash: &str) -> StoreResult<()> {
        let done = sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .bind(hash)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 { Err(StoreError::NotFound("user")) } else { Ok(()) }
    }

    async fn addresses(&self, user: UserId) -> StoreResult<Vec<Address>> {
        let mut conn = self.pool.acquire().await?;
        fetch_addresses(&mut conn, user).await
    }

    async fn add_address(&self, user: UserId, new: NewAddress) -> StoreResult<Address> {
        let mut tx = self.pool.begin().await?;
        let address = insert_address(&mut tx, user, new).await?;
        tx.commit().await?;
        Ok(address)
    }

    async fn categories(&self) -> StoreResult<Vec<Category>> {
        let rows: Vec<CategoryRow> = sqlx::query_as("SELECT id, name, created_at FROM categories WHERE deleted_at IS NULL ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Category::from).collect())
    }

    async fn category(&self, id: CategoryId) -> StoreResult<Option<Category>> {
        let row: Option<CategoryRow> = sqlx::query_as("SELECT id, name, created_at FROM categories WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Category::from))
    }

    async fn create_category(&self, name: &str) -> StoreResult<Category> {
        let row: CategoryRow = sqlx::query_as("INSERT INTO categories (id, name) VALUES ($1, $2) RETURNING id, name, created_at")
            .bind(CategoryId::generate())
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| if has_code(&e, UNIQUE_VIOLATION) { StoreError::Conflict(format!("category '{name}' already exists")) } else { e.into() })?;
        Ok(row.into())
    }

    async fn products(&self, filter: ProductFilter) -> StoreResult<Vec<Product>> {
        let mut conn = self.pool.acquire().await?;
        fetch_products(&mut conn, filter, None).await
    }

    async fn product(&self, id: ProductId) -> StoreResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        fetch_product(&mut conn, id).await
    }

    async fn create_product(&self, owner: UserId, draft: ProductDraft) -> StoreResult<Product> {
        let mut tx = self.pool.begin().await?;
        ensure_category(&mut tx, draft.category_id).await?;
        let id = ProductId::generate();
        sqlx::query("INSERT INTO products (id, name, description, price, category_id, user_id) VALUES ($1, $2, $3, $4, $5, $6)")
            .bind(id)
            .bind(&draft.name)
            .bind(&draft.description)
            .bind(draft.price.amount())
            .bind(draft.category_id)
            .bind(owner)
            .execute(&mut *tx)
            .await
            .map_err(price_out_of_range)?;
        write_images(&mut tx, id, &draft).await?;
        let product = fetch_product(&mut tx, id).await?.ok_or(StoreError::NotFound("product"))?;
        tx.commit().await?;
        Ok(product)
    }

    async fn update_product(&self, id: ProductId, draft: ProductDraft) -> StoreResult<Product> {
        let mut tx = self.pool.begin().await?;
        ensure_category(&mut tx, draft.category_id).await?;
        let done = sqlx::query(
            "UPDATE products SET name = $2, description = $3, price = $4, category_id = $5, updated_at = now()
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(draft.price.amount())
        .bind(draft.category_id)
        .execute(&mut *tx)
        .await
        .map_err(price_out_of_range)?;
        if done.rows_affected() == 0 { return Err(StoreError::NotFound("product")); }
        soft_delete_images(&mut tx, id).await?;
        write_images(&mut tx, id, &draft).await?;
        let product = fetch_product(&mut tx, id).await?.ok_or(StoreError::NotFound("product"))?;
        tx.commit().await?;
        Ok(product)
    }

    async fn delete_product(&self, id: ProductId) -> StoreResult<ProductRemoval> {
        let mut tx = self.pool.begin().await?;
        let locked: Option<ProductId> = sqlx::query_scalar("SELECT id FROM products WHERE id = $1 AND deleted_at IS NULL FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() { return Err(StoreError::NotFound("product")); }

        let cart_items_removed = sqlx::query("UPDATE cart_items SET deleted_at = now() WHERE product_id = $1 AND deleted_at IS NULL")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let images_removed = soft_delete_images(&mut tx, id).await?;
        sqlx::query("UPDATE products SET deleted_at = now() WHERE id = $1").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(ProductRemoval { product_id: id, cart_items_removed, images_removed })
    }

    async fn cart(&self, user: UserId) -> StoreResult<Cart> {
        let mut conn = self.pool.acquire().await?;
        let id = cart_or_create(&mut conn, user).await?;
        let items = cart_lines(&mut conn, id).await?;
        Ok(Cart { id, user_id: user, items })
    }

    async fn add_to_cart(&self, user: UserId, product: ProductId, quantity: Quantity) -> StoreResult<(CartLine, LineChange)> {
        let mut tx = self.pool.begin().await?;
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM products WHERE id = $1 AND deleted_at IS NULL)")
            .bind(product)
            .fetch_one(&mut *tx)
            .await?;
        if !exists { return Err(StoreError::NotFound("product")); }

        let cart = cart_or_create(&mut tx, user).await?;
        let (item, inserted): (CartItemId, bool) = sqlx::query_as(
            "INSERT INTO cart_items (id, cart_id, product_id, quantity) VALUES ($1, $2, $3, $4)
             ON CONFLICT (cart_id, product_id) WHERE deleted_at IS NULL
             DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity, updated_at = now()
             RETURNING id, (xmax = 0) AS inserted",
        )
        .bind(CartItemId::generate())
        .bind(cart)
        .bind(product)
        .bind(quantity.value())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| if has_code(&e, NUMERIC_OUT_OF_RANGE) { CartError::QuantityOverflow.into() } else { StoreError::from(e) })?;

        let line = cart_line(&mut tx, item).await?;
        tx.commit().await?;
        Ok((line, if inserted { LineChange::Created } else { LineChange::Incremented }))
    }

    async fn set_cart_quantity(&self, user: UserId, product: ProductId, quantity: Quantity) -> StoreResult<CartLine> {
        let mut tx = self.pool.begin().await?;
        let cart = live_cart(&mut tx, user).await?.ok_or(StoreError::Cart(CartError::CartNotFound))?;
        let item: Option<CartItemId> = sqlx::query_scalar(
            "UPDATE cart_items SET quantity = $3, updated_at = now()
             WHERE cart_id = $1 AND product_id = $2 AND deleted_at IS NULL RETURNING id",
        )
        .bind(cart)
        .bind(product)
        .bind(quantity.value())
        .fetch_optional(&mut *tx)
        .await?;
        let line = cart_line(&mut tx, item.ok_or(StoreError::Cart(CartError::ItemNotFound))?).await?;
        tx.commit().await?;
        Ok(line)
    }

    async fn remove_from_cart(&self, user: UserId, product: ProductId) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        let cart = live_cart(&mut conn, user).await?.ok_or(StoreError::Cart(CartError::CartNotFound))?;
        let done = sqlx::query("UPDATE cart_items SET deleted_at = now() WHERE cart_id = $1 AND product_id = $2 AND deleted_at IS NULL")
            .bind(cart)
            .bind(product)
            .execute(&mut *conn)
            .await?;
        if done.rows_affected() == 0 { Err(StoreError::Cart(CartError::ItemNotFound)) } else { Ok(()) }
    }

    async fn clear_cart(&self, user: UserId) -> StoreResult<u64> {
        let mut conn = self.pool.acquire().await?;
        let cart = cart_or_create(&mut conn, user).await?;
        let done = sqlx::query("UPDATE cart_items SET deleted_at = now() WHERE cart_id = $1 AND deleted_at IS NULL")
            .bind(cart)
            .execute(&mut *conn)
            .await?;
        Ok(done.rows_affected())
    }

    async fn cart_quantity(&self, user: UserId) -> StoreResult<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COALESCE(SUM(ci.quantity), 0)::BIGINT
             FROM cart_items ci
             JOIN carts c ON c.id = ci.cart_id AND c.deleted_at IS NULL
             JOIN products p ON p.id = ci.product_id AND p.deleted_at IS NULL
             WHERE c.user_id = $1 AND ci.deleted_at IS NULL",
        )
        .bind(user)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn place_order(&self, req: PlaceOrder) -> StoreResult<Order> {
        let mut tx = self.pool.begin().await?;

        // A second checkout of the same cart blocks here, then finds it empty.
        let cart_id: Option<CartId> = sqlx::query_scalar("SELECT id FROM carts WHERE user_id = $1 AND deleted_at IS NULL FOR UPDATE")
            .bind(req.user_id)
            .fetch_optional(&mut *tx)
            .await?;
        let cart_id = cart_id.ok_or(OrderError::EmptyCart)?;
        let cart = Cart { id: cart_id, user_id: req.user_id, items: cart_lines(&mut tx, cart_id).await? };
        if cart.is_empty() { return Err(OrderError::EmptyCart.into()); }

        let address = match req.shipping {
            ShippingTarget::New(new) => insert_address(&mut tx, req.user_id, new).await?,
            ShippingTarget::Saved => {
                let addresses = fetch_addresses(&mut tx, req.user_id).await?;
                resolve_shipping_address(&addresses).cloned().ok_or(OrderError::NoShippingAddress)?
            }
        };

        let draft = OrderDraft::from_cart(&cart, &address, &req.policy, &req.settlement)?;
        let ship = &draft.address;
        sqlx::query(
            "INSERT INTO orders (id, user_id, address_id, ship_first_name, ship_last_name, ship_email, ship_phone, ship_address,
                                 ship_city, ship_postal_code, status, subtotal, shipping, total_price)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(draft.id)
        .bind(draft.user_id)
        .bind(ship.address_id)
        .bind(&ship.first_name)
        .bind(&ship.last_name)
        .bind(&ship.email)
        .bind(&ship.phone)
        .bind(&ship.address)
        .bind(&ship.city)
        .bind(&ship.postal_code)
        .bind(draft.status.as_str())
        .bind(draft.quote.subtotal)
        .bind(draft.quote.shipping)
        .bind(draft.quote.total)
        .execute(&mut *tx)
        .await
        .map_err(|e| if has_code(&e, NUMERIC_OUT_OF_RANGE) { OrderError::TotalTooLarge.into() } else { StoreError::from(e) })?;

        for item in &draft.items {
            sqlx::query("INSERT INTO order_items (id, order_id, product_id, product_name, quantity, price) VALUES ($1, $2, $3, $4, $5, $6)")
                .bind(item.id)
                .bind(item.order_id)
                .bind(item.product_id)
                .bind(&item.product_name)
                .bind(item.quantity.value())
                .bind(item.price)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(payment) = &draft.payment {
            insert_payment(&mut tx, payment).await?;
        }

        sqlx::query("UPDATE cart_items SET deleted_at = now() WHERE cart_id = $1 AND deleted_at IS NULL")
            .bind(cart_id)
            .execute(&mut *tx)
            .await?;

        let order = fetch_order(&mut tx, req.user_id, draft.id).await?.ok_or(StoreError::NotFound("order"))?;
        tx.commit().await?;
        Ok(order)
    }

    async fn orders(&self, user: UserId) -> StoreResult<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        fetch_orders(&mut conn, user, None).await
    }

    async fn order(&self, user: UserId, id: OrderId) -> StoreResult<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, user, id).await
    }

    async fn transition_order(&self, user: UserId, id: OrderId, to: OrderStatus) -> StoreResult<(Order, OrderStatus)> {
        let mut tx = self.pool.begin().await?;
        let (from, _) = lock_order(&mut tx, user, id).await?;
        set_order_status(&mut tx, id, from.transition(to)?).await?;
        let order = fetch_order(&mut tx, user, id).await?.ok_or(StoreError::NotFound("order"))?;
        tx.commit().await?;
        Ok((order, from))
    }

    async fn record_payment(&self, user: UserId, new: NewPayment) -> StoreResult<Payment> {
        let mut tx = self.pool.begin().await?;
        let (status, expected) = lock_order(&mut tx, user, new.order_id).await?;
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM payments WHERE order_id = $1 AND deleted_at IS NULL)")
            .bind(new.order_id)
            .fetch_one(&mut *tx)
            .await?;
        if exists { return Err(OrderError::PaymentExists.into()); }
        if new.amount != expected { return Err(OrderError::AmountMismatch { given: new.amount, expected }.into()); }

        let next = status.transition(OrderStatus::Paid)?;
        let mut payment = Payment::pending(new.order_id, &new.method, new.amount);
        payment.complete()?;
        insert_payment(&mut tx, &payment).await?;
        set_order_status(&mut tx, new.order_id, next).await?;
        tx.commit().await?;
        Ok(payment)
    }

    async fn payment(&self, user: UserId, order: OrderId) -> StoreResult<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as(
            "SELECT p.id, p.order_id, p.method, p.amount, p.status, p.created_at
             FROM payments p JOIN orders o ON o.id = p.order_id
             WHERE p.order_id = $1 AND o.user_id = $2 AND p.deleted_at IS NULL AND o.deleted_at IS NULL",
        )
        .bind(order)
        .bind(user)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Payment::try_from).transpose()
    }
}
