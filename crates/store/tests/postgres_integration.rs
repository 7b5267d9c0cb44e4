//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{
    Account, CartIdentity, Category, CategoryId, Money, OrderId, OrderStatus, Product, ProductId,
    Role, SessionToken, Tag, TagId, UserId,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{
    AccountRepository, CartRepository, CategoryRepository, OrderRepository, PostgresStore,
    ProductOrdering, ProductQuery, ProductRepository, SortField, StoreError, TagRepository,
};
use uuid::Uuid;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_shop_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/002_create_accounts.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::raw_sql(
        r#"
        DROP TRIGGER IF EXISTS reject_order_items ON order_items;
        TRUNCATE TABLE accounts, order_items, orders, cart_items, carts, product_tags, products,
            tags, categories;
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStore::new(pool)
}

async fn seed_category(store: &PostgresStore, slug: &str) -> Category {
    let category = Category {
        id: CategoryId::new(),
        name: slug.to_string(),
        slug: slug.to_string(),
        description: String::new(),
        parent_id: None,
        sort_order: 0,
        is_active: true,
        created_at: Utc::now(),
    };
    store.insert_category(&category).await.unwrap();
    category
}

fn product(category: &Category, slug: &str, price_cents: i64) -> Product {
    let now = Utc::now();
    Product {
        id: ProductId::new(),
        name: slug.replace('-', " "),
        slug: slug.to_string(),
        description: String::new(),
        short_description: String::new(),
        price: Money::from_cents(price_cents),
        old_price: None,
        category_id: category.id,
        tag_ids: vec![],
        weight_grams: 100,
        quantity_on_hand: 20,
        in_stock: true,
        is_active: true,
        views_count: 0,
        orders_count: 0,
        created_at: now,
        updated_at: now,
    }
}

async fn seed_product(store: &PostgresStore, category: &Category, slug: &str, price: i64) -> Product {
    let p = product(category, slug, price);
    store.insert_product(&p).await.unwrap();
    p
}

/// Makes every insert into `order_items` fail until the next test store is
/// created.
async fn reject_order_items(store: &PostgresStore) {
    sqlx::raw_sql(
        r#"
        CREATE OR REPLACE FUNCTION reject_order_item() RETURNS trigger AS $$
        BEGIN
            RAISE EXCEPTION 'order items are rejected';
        END;
        $$ LANGUAGE plpgsql;

        CREATE TRIGGER reject_order_items BEFORE INSERT ON order_items
            FOR EACH ROW EXECUTE FUNCTION reject_order_item();
        "#,
    )
    .execute(store.pool())
    .await
    .unwrap();
}

#[tokio::test]
#[serial]
async fn product_round_trip_with_tags() {
    let store = get_test_store().await;
    let category = seed_category(&store, "chocolate").await;
    let tag = Tag {
        id: TagId::new(),
        name: "Bestseller".to_string(),
        slug: "bestseller".to_string(),
        color: Tag::DEFAULT_COLOR.to_string(),
    };
    store.insert_tag(&tag).await.unwrap();

    let mut p = product(&category, "milk-bar", 350);
    p.tag_ids = vec![tag.id];
    store.insert_product(&p).await.unwrap();

    let loaded = store.product_by_slug("milk-bar").await.unwrap().unwrap();
    assert_eq!(loaded.id, p.id);
    assert_eq!(loaded.price, Money::from_cents(350));
    assert_eq!(loaded.tag_ids, vec![tag.id]);

    let tagged = store
        .list_products(&ProductQuery::new().tag(tag.id))
        .await
        .unwrap();
    assert_eq!(tagged.len(), 1);
}

#[tokio::test]
#[serial]
async fn duplicate_slug_is_rejected() {
    let store = get_test_store().await;
    let category = seed_category(&store, "chocolate").await;
    seed_product(&store, &category, "milk-bar", 350).await;

    let result = store
        .insert_product(&product(&category, "milk-bar", 400))
        .await;
    assert!(matches!(result, Err(StoreError::Duplicate { .. })));
}

#[tokio::test]
#[serial]
async fn unknown_category_is_a_missing_reference() {
    let store = get_test_store().await;
    let orphan = Category {
        id: CategoryId::new(),
        name: "ghost".to_string(),
        slug: "ghost".to_string(),
        description: String::new(),
        parent_id: None,
        sort_order: 0,
        is_active: true,
        created_at: Utc::now(),
    };

    let result = store.insert_product(&product(&orphan, "lost", 100)).await;
    assert!(matches!(result, Err(StoreError::MissingReference(_))));
}

#[tokio::test]
#[serial]
async fn listing_honours_ordering_and_search() {
    let store = get_test_store().await;
    let category = seed_category(&store, "chocolate").await;
    seed_product(&store, &category, "dark-bunny", 900).await;
    seed_product(&store, &category, "milk-bar", 300).await;
    seed_product(&store, &category, "white-egg", 500).await;

    let by_price = store
        .list_products(
            &ProductQuery::new().ordering(ProductOrdering::ascending(SortField::Price)),
        )
        .await
        .unwrap();
    let prices: Vec<i64> = by_price.iter().map(|p| p.price.cents()).collect();
    assert_eq!(prices, vec![300, 500, 900]);

    let found = store
        .list_products(&ProductQuery::new().search("BUNNY"))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].slug, "dark-bunny");

    let limited = store
        .list_products(&ProductQuery::new().limit(2))
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
#[serial]
async fn find_or_create_cart_is_stable() {
    let store = get_test_store().await;
    let identity = CartIdentity::Session(SessionToken::parse("guest-1").unwrap());

    let first = store.find_or_create_cart(&identity).await.unwrap();
    let second = store.find_or_create_cart(&identity).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.owner, identity);

    let other = store
        .find_or_create_cart(&CartIdentity::User(UserId::new()))
        .await
        .unwrap();
    assert_ne!(first.id, other.id);
}

#[tokio::test]
#[serial]
async fn adding_same_product_increments_one_line() {
    let store = get_test_store().await;
    let category = seed_category(&store, "chocolate").await;
    let p = seed_product(&store, &category, "milk-bar", 350).await;
    let cart = store
        .find_or_create_cart(&CartIdentity::User(UserId::new()))
        .await
        .unwrap();

    store.add_or_increment_item(cart.id, p.id, 2).await.unwrap();
    let item = store.add_or_increment_item(cart.id, p.id, 3).await.unwrap();
    assert_eq!(item.quantity, 5);

    let lines = store.cart_lines(cart.id).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].item.quantity, 5);
    assert_eq!(lines[0].total_price(), Money::from_cents(1750));
}

#[tokio::test]
#[serial]
async fn concurrent_adds_never_duplicate_lines() {
    let store = get_test_store().await;
    let category = seed_category(&store, "chocolate").await;
    let p = seed_product(&store, &category, "milk-bar", 100).await;
    let cart = store
        .find_or_create_cart(&CartIdentity::User(UserId::new()))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.add_or_increment_item(cart.id, p.id, 1).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let lines = store.cart_lines(cart.id).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].item.quantity, 8);
}

#[tokio::test]
#[serial]
async fn set_and_remove_are_scoped_to_the_cart() {
    let store = get_test_store().await;
    let category = seed_category(&store, "chocolate").await;
    let p = seed_product(&store, &category, "milk-bar", 100).await;
    let mine = store
        .find_or_create_cart(&CartIdentity::User(UserId::new()))
        .await
        .unwrap();
    let theirs = store
        .find_or_create_cart(&CartIdentity::User(UserId::new()))
        .await
        .unwrap();
    let item = store.add_or_increment_item(mine.id, p.id, 1).await.unwrap();

    assert!(
        store
            .set_item_quantity(theirs.id, item.id, 4)
            .await
            .unwrap()
            .is_none()
    );
    assert!(!store.remove_item(theirs.id, item.id).await.unwrap());

    let updated = store
        .set_item_quantity(mine.id, item.id, 4)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.quantity, 4);
    assert!(store.remove_item(mine.id, item.id).await.unwrap());
    assert!(store.cart_lines(mine.id).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn place_order_persists_snapshot_and_empties_cart() {
    let store = get_test_store().await;
    let category = seed_category(&store, "chocolate").await;
    let p = seed_product(&store, &category, "milk-bar", 350).await;
    let user = UserId::new();
    let cart = store
        .find_or_create_cart(&CartIdentity::User(user))
        .await
        .unwrap();
    store.add_or_increment_item(cart.id, p.id, 2).await.unwrap();

    let placed = store
        .place_order(user, cart.id, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(placed.status, OrderStatus::Pending);
    assert_eq!(placed.owner, user);
    assert!(store.cart_lines(cart.id).await.unwrap().is_empty());

    // Repricing the product must not touch the stored order.
    let mut repriced = p.clone();
    repriced.price = Money::from_cents(999);
    repriced.updated_at = Utc::now();
    assert!(store.update_product(&repriced).await.unwrap());

    let loaded = store.order(placed.id).await.unwrap().unwrap();
    assert_eq!(loaded.items.len(), 1);
    assert_eq!(loaded.items[0].unit_price, Money::from_cents(350));
    assert_eq!(loaded.total_price(), Money::from_cents(700));
    assert_eq!(store.orders_for_owner(user).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn failed_order_item_rolls_everything_back() {
    let store = get_test_store().await;
    let category = seed_category(&store, "chocolate").await;
    let p = seed_product(&store, &category, "milk-bar", 350).await;
    let user = UserId::new();
    let cart = store
        .find_or_create_cart(&CartIdentity::User(user))
        .await
        .unwrap();
    store.add_or_increment_item(cart.id, p.id, 1).await.unwrap();
    reject_order_items(&store).await;

    let result = store.place_order(user, cart.id, Utc::now()).await;
    assert!(matches!(result, Err(StoreError::Database(_))));
    assert_eq!(store.count_orders().await.unwrap(), 0);
    assert_eq!(store.cart_lines(cart.id).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn place_order_on_empty_cart_writes_nothing() {
    let store = get_test_store().await;
    let user = UserId::new();
    let cart = store
        .find_or_create_cart(&CartIdentity::User(user))
        .await
        .unwrap();

    let placed = store.place_order(user, cart.id, Utc::now()).await.unwrap();
    assert!(placed.is_none());
    assert_eq!(store.count_orders().await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn place_order_waits_for_a_concurrent_cart_writer() {
    let store = get_test_store().await;
    let category = seed_category(&store, "chocolate").await;
    let bar = seed_product(&store, &category, "milk-bar", 350).await;
    let fudge = seed_product(&store, &category, "hazelnut-fudge", 300).await;
    let user = UserId::new();
    let cart = store
        .find_or_create_cart(&CartIdentity::User(user))
        .await
        .unwrap();
    store.add_or_increment_item(cart.id, bar.id, 1).await.unwrap();

    // Another connection holds the cart lock and adds a line.
    let other = PgPool::connect(&get_container_info().await.connection_string)
        .await
        .unwrap();
    let mut writer = other.begin().await.unwrap();
    sqlx::query("SELECT id FROM carts WHERE id = $1 FOR UPDATE")
        .bind(cart.id.as_uuid())
        .fetch_one(&mut *writer)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO cart_items (id, cart_id, product_id, quantity, added_at) VALUES ($1, $2, $3, 2, NOW())",
    )
    .bind(Uuid::new_v4())
    .bind(cart.id.as_uuid())
    .bind(fudge.id.as_uuid())
    .execute(&mut *writer)
    .await
    .unwrap();

    let placing = tokio::spawn({
        let store = store.clone();
        let cart_id = cart.id;
        async move { store.place_order(user, cart_id, Utc::now()).await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    writer.commit().await.unwrap();

    let order = placing.await.unwrap().unwrap().unwrap();
    assert_eq!(order.items.len(), 2);
    let fudge_line = order
        .items
        .iter()
        .find(|i| i.product_id == fudge.id)
        .unwrap();
    assert_eq!(fudge_line.quantity, 2);
    assert!(store.cart_lines(cart.id).await.unwrap().is_empty());
    assert_eq!(store.order(order.id).await.unwrap().unwrap().items.len(), 2);
}

#[tokio::test]
#[serial]
async fn ordered_product_cannot_be_deleted() {
    let store = get_test_store().await;
    let category = seed_category(&store, "chocolate").await;
    let p = seed_product(&store, &category, "milk-bar", 350).await;
    let user = UserId::new();
    let cart = store
        .find_or_create_cart(&CartIdentity::User(user))
        .await
        .unwrap();
    store.add_or_increment_item(cart.id, p.id, 1).await.unwrap();
    store
        .place_order(user, cart.id, Utc::now())
        .await
        .unwrap()
        .unwrap();

    let result = store.delete_product(p.id).await;
    assert!(matches!(result, Err(StoreError::InUse { .. })));
    assert!(store.product(p.id).await.unwrap().is_some());
}

#[tokio::test]
#[serial]
async fn order_status_updates_and_counters() {
    let store = get_test_store().await;
    let category = seed_category(&store, "chocolate").await;
    let p = seed_product(&store, &category, "milk-bar", 350).await;
    let user = UserId::new();
    let cart = store
        .find_or_create_cart(&CartIdentity::User(user))
        .await
        .unwrap();
    store.add_or_increment_item(cart.id, p.id, 3).await.unwrap();
    let placed = store
        .place_order(user, cart.id, Utc::now())
        .await
        .unwrap()
        .unwrap();

    let updated = store
        .update_order_status(placed.id, OrderStatus::Processing, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, OrderStatus::Processing);
    assert!(
        store
            .update_order_status(OrderId::new(), OrderStatus::Processing, Utc::now())
            .await
            .unwrap()
            .is_none()
    );

    store.record_orders(p.id, 3).await.unwrap();
    store.record_view(p.id).await.unwrap();
    let reloaded = store.product(p.id).await.unwrap().unwrap();
    assert_eq!(reloaded.orders_count, 3);
    assert_eq!(reloaded.views_count, 1);
}

#[tokio::test]
#[serial]
async fn accounts_round_trip_and_enforce_unique_fields() {
    let store = get_test_store().await;
    let mut alice = Account::new(UserId::new(), Role::Customer, Utc::now());
    alice.username = "alice".to_string();
    alice.email = Some("alice@example.com".to_string());
    store.insert_account(&alice).await.unwrap();

    // Two accounts without an email do not collide.
    let mut bob = Account::new(UserId::new(), Role::Admin, Utc::now());
    store.insert_account(&bob).await.unwrap();
    let loaded = store.account(bob.user_id).await.unwrap().unwrap();
    assert_eq!(loaded.role, Role::Admin);
    assert_eq!(loaded.email, None);

    bob.username = "alice".to_string();
    let result = store.update_account(&bob).await;
    assert!(matches!(
        result,
        Err(StoreError::Duplicate {
            entity: "username",
            ..
        })
    ));

    bob.username = "bob".to_string();
    bob.email = Some("alice@example.com".to_string());
    let result = store.update_account(&bob).await;
    assert!(matches!(
        result,
        Err(StoreError::Duplicate { entity: "email", .. })
    ));

    bob.email = Some("bob@example.com".to_string());
    bob.phone = "+1 555 0100".to_string();
    assert!(store.update_account(&bob).await.unwrap());
    let loaded = store.account(bob.user_id).await.unwrap().unwrap();
    assert_eq!(loaded.username, "bob");
    assert_eq!(loaded.phone, "+1 555 0100");

    let ghost = Account::new(UserId::new(), Role::Customer, Utc::now());
    assert!(!store.update_account(&ghost).await.unwrap());
    assert!(store.account(ghost.user_id).await.unwrap().is_none());
}
