//! PostgreSQL store integration tests using testcontainers.
//!
//! Run with: cargo test --test storage_postgres --features postgres-tests -- --nocapture
//!
//! Each test starts its own PostgreSQL container and runs the migrations, so
//! the tests share nothing and can run in parallel.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};

use marketplace_api::domain::aggregates::{
    CartError, LineChange, NewAddress, NewUser, OrderError, OrderStatus, PaymentStatus, ProductDraft, ProfileUpdate,
    Settlement, ShippingPolicy,
};
use marketplace_api::domain::ids::{ProductId, UserId};
use marketplace_api::domain::value_objects::{Email, Price, ProfileImage, Quantity};
use marketplace_api::store::{PgStore, PlaceOrder, ShippingTarget, Store, StoreError};

const PNG: &str = "data:image/png;base64,iVBORw0KGgo=";

/// Start PostgreSQL and return the container with a migrated store.
///
/// The container must outlive the store; dropping it stops PostgreSQL.
async fn start_postgres() -> (ContainerAsync<GenericImage>, PgStore) {
    // The ready message is printed once for the init server and once for the
    // real one, so a short pause follows the wait.
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stdout("database system is ready to accept connections"))
        .with_env_var("POSTGRES_USER", "marketplace")
        .with_env_var("POSTGRES_PASSWORD", "marketplace")
        .with_env_var("POSTGRES_DB", "marketplace")
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start postgres container");
    tokio::time::sleep(Duration::from_secs(1)).await;

    let host = container.get_host().await.expect("Failed to get container host");
    let port = container.get_host_port_ipv4(5432).await.expect("Failed to get mapped port");
    let url = format!("postgres://marketplace:marketplace@{host}:{port}/marketplace");
    println!("PostgreSQL available at: {url}");

    let store = PgStore::connect(&url, 5).await.expect("Failed to connect to PostgreSQL");
    store.migrate().await.expect("Failed to run migrations");
    (container, store)
}

async fn seed_user(store: &PgStore, email: &str) -> UserId {
    let new = NewUser {
        name: "Buyer".into(),
        email: Email::parse(email).unwrap(),
        password_hash: Some("hash".into()),
        profile_image_url: ProfileImage::default(),
        initial_address: Some(NewAddress { address: "1 Main St".into(), phone: "0800".into(), ..Default::default() }),
    };
    store.create_user(new).await.unwrap().id
}

async fn seed_product(store: &PgStore, owner: UserId, price: i64) -> ProductId {
    let category = match store.categories().await.unwrap().into_iter().next() {
        Some(c) => c.id,
        None => store.create_category("Fashion").await.unwrap().id,
    };
    let draft = ProductDraft::new("NY Hat", "Stylish", Price::new(Decimal::from(price)).unwrap(), category, vec![PNG.into(), PNG.into()]).unwrap();
    store.create_product(owner, draft).await.unwrap().id
}

fn qty(n: i64) -> Quantity { Quantity::new(n).unwrap() }

fn checkout(user: UserId) -> PlaceOrder {
    PlaceOrder {
        user_id: user,
        shipping: ShippingTarget::Saved,
        settlement: Settlement::Simulated { method: "card".into() },
        policy: ShippingPolicy::default(),
    }
}

#[tokio::test]
async fn test_postgres_cart_upsert() {
    let (_container, store) = start_postgres().await;
    let user = seed_user(&store, "a@example.com").await;
    let product = seed_product(&store, user, 10).await;

    let (first, change) = store.add_to_cart(user, product, qty(2)).await.unwrap();
    assert_eq!(change, LineChange::Created);
    let (again, change) = store.add_to_cart(user, product, qty(3)).await.unwrap();
    assert_eq!(change, LineChange::Incremented);
    assert_eq!(again.id, first.id);
    assert_eq!(again.quantity.value(), 5);
    assert_eq!(store.cart(user).await.unwrap().items.len(), 1);
    assert_eq!(store.cart_quantity(user).await.unwrap(), 5);

    store.set_cart_quantity(user, product, qty(i64::from(i32::MAX))).await.unwrap();
    let err = store.add_to_cart(user, product, qty(1)).await.unwrap_err();
    assert!(matches!(err, StoreError::Cart(CartError::QuantityOverflow)));

    let err = store.add_to_cart(user, ProductId::generate(), qty(1)).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound("product")));
}

#[tokio::test]
async fn test_postgres_duplicate_email_conflicts() {
    let (_container, store) = start_postgres().await;
    seed_user(&store, "a@example.com").await;
    let dup = NewUser {
        name: "Again".into(),
        email: Email::parse("A@Example.com").unwrap(),
        password_hash: None,
        profile_image_url: ProfileImage::default(),
        initial_address: None,
    };
    assert!(matches!(store.create_user(dup).await, Err(StoreError::Conflict(_))));
}

#[tokio::test]
async fn test_postgres_empty_cart_checkout_writes_nothing() {
    let (_container, store) = start_postgres().await;
    let user = seed_user(&store, "a@example.com").await;

    let err = store.place_order(checkout(user)).await.unwrap_err();
    assert!(matches!(err, StoreError::Order(OrderError::EmptyCart)));
    store.cart(user).await.unwrap();
    let err = store.place_order(checkout(user)).await.unwrap_err();
    assert!(matches!(err, StoreError::Order(OrderError::EmptyCart)));
    assert!(store.orders(user).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_postgres_checkout_snapshots_price_and_address() {
    let (_container, store) = start_postgres().await;
    let user = seed_user(&store, "a@example.com").await;
    let product = seed_product(&store, user, 300).await;
    store.add_to_cart(user, product, qty(2)).await.unwrap();

    let order = store.place_order(checkout(user)).await.unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!((order.subtotal, order.shipping, order.total_price), (Decimal::from(600), Decimal::from(100), Decimal::from(700)));
    assert_eq!(order.payment.as_ref().map(|p| p.status), Some(PaymentStatus::Completed));
    assert_eq!(store.cart_quantity(user).await.unwrap(), 0);

    let existing = store.product(product).await.unwrap().unwrap();
    let draft = ProductDraft::new(&existing.name, "", Price::new(Decimal::from(999)).unwrap(), existing.category_id, vec![PNG.into()]).unwrap();
    store.update_product(product, draft).await.unwrap();
    let update = ProfileUpdate { address: Some("99 Moved Ave".into()), ..Default::default() };
    store.update_profile(user, update).await.unwrap();

    let stored = store.order(user, order.id).await.unwrap().unwrap();
    assert_eq!(stored.items[0].price, Decimal::from(300));
    assert_eq!(stored.subtotal, Decimal::from(600));
    assert_eq!(stored.address.address, "1 Main St");
    assert_eq!(stored.address.phone, "0800");
    assert_eq!(store.addresses(user).await.unwrap()[0].address, "99 Moved Ave");
}

#[tokio::test]
async fn test_postgres_delete_product_cascades() {
    let (_container, store) = start_postgres().await;
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
    assert!(matches!(store.delete_product(product).await, Err(StoreError::NotFound("product"))));

    // Soft-deleted rows stay on disk.
    let images: i64 = sqlx::query_scalar("SELECT count(*) FROM product_images WHERE product_id = $1 AND deleted_at IS NOT NULL")
        .bind(product)
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(images, 2);
}

#[tokio::test]
async fn test_postgres_concurrent_checkouts_charge_once() {
    let (_container, store) = start_postgres().await;
    let store = Arc::new(store);
    let user = seed_user(&store, "a@example.com").await;
    let product = seed_product(&store, user, 100).await;
    store.add_to_cart(user, product, qty(1)).await.unwrap();

    let a = tokio::spawn({
        let s = store.clone();
        async move { s.place_order(checkout(user)).await }
    });
    let b = tokio::spawn({
        let s = store.clone();
        async move { s.place_order(checkout(user)).await }
    });
    let results = [a.await.unwrap(), b.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(r, Err(StoreError::Order(OrderError::EmptyCart)))));
    assert_eq!(store.orders(user).await.unwrap().len(), 1);

    let payments: i64 = sqlx::query_scalar("SELECT count(*) FROM payments p JOIN orders o ON o.id = p.order_id WHERE o.user_id = $1")
        .bind(user)
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(payments, 1);
}
