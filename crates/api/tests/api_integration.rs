//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use chrono::Utc;
use common::{Category, CategoryId, Money, Principal, Product, ProductId, UserId};
use domain::StaticIdentityProvider;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use store::{CategoryRepository, InMemoryStore, ProductRepository};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

const ALICE: &str = "alice-token";
const BOB: &str = "bob-token";
const ADMIN: &str = "admin-token";

struct TestApp {
    app: axum::Router,
    store: InMemoryStore,
    category: Category,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

async fn setup() -> TestApp {
    let store = InMemoryStore::new();
    let identity = StaticIdentityProvider::new()
        .with_token(ALICE, Principal::customer(UserId::new()))
        .with_token(BOB, Principal::customer(UserId::new()))
        .with_token(ADMIN, Principal::admin(UserId::new()));

    let category = Category {
        id: CategoryId::new(),
        name: "Chocolate".to_string(),
        slug: "chocolate".to_string(),
        description: String::new(),
        parent_id: None,
        sort_order: 0,
        is_active: true,
        created_at: Utc::now(),
    };
    store.insert_category(&category).await.unwrap();

    let state = api::create_state(store.clone(), Arc::new(identity));
    TestApp {
        app: api::create_app(state, get_metrics_handle()),
        store,
        category,
    }
}

impl TestApp {
    async fn seed_product(&self, slug: &str, price_cents: i64, on_hand: u32) -> Product {
        let now = Utc::now();
        let product = Product {
            id: ProductId::new(),
            name: slug.replace('-', " "),
            slug: slug.to_string(),
            description: format!("All about {slug}"),
            short_description: String::new(),
            price: Money::from_cents(price_cents),
            old_price: None,
            category_id: self.category.id,
            tag_ids: vec![],
            weight_grams: 100,
            quantity_on_hand: on_hand,
            in_stock: true,
            is_active: true,
            views_count: 0,
            orders_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_product(&product).await.unwrap();
        product
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        Reply {
            status,
            headers,
            body,
        }
    }

    async fn as_user(&self, token: &str, method: &str, uri: &str, body: Option<Value>) -> Reply {
        let bearer = format!("Bearer {token}");
        self.send(method, uri, &[("authorization", bearer.as_str())], body)
            .await
    }
}

#[tokio::test]
async fn test_health_check() {
    let t = setup().await;
    let reply = t.send("GET", "/health", &[], None).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["status"], "ok");
    assert_eq!(reply.body["storage"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = setup().await;
    let reply = t.send("GET", "/metrics", &[], None).await;
    assert_eq!(reply.status, StatusCode::OK);
}

mod account {
    use super::*;

    #[tokio::test]
    async fn me_requires_a_valid_token() {
        let t = setup().await;

        let reply = t.send("GET", "/auth/me", &[], None).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

        let reply = t.as_user("forged", "GET", "/auth/me", None).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

        let reply = t.as_user(ADMIN, "GET", "/auth/me", None).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["role"], "admin");
        assert!(reply.body["username"].as_str().unwrap().starts_with("user-"));
    }

    #[tokio::test]
    async fn profile_updates_are_persisted() {
        let t = setup().await;

        let reply = t
            .as_user(
                ALICE,
                "PATCH",
                "/auth/me",
                Some(json!({
                    "username": "alice",
                    "email": "alice@example.com",
                    "phone": "+1 555 0100",
                })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["username"], "alice");

        let reply = t.as_user(ALICE, "GET", "/auth/me", None).await;
        assert_eq!(reply.body["username"], "alice");
        assert_eq!(reply.body["email"], "alice@example.com");
        assert_eq!(reply.body["phone"], "+1 555 0100");
        assert_eq!(reply.body["role"], "customer");

        // The role comes from the identity provider, not the request.
        let reply = t
            .as_user(ALICE, "PATCH", "/auth/me", Some(json!({ "role": "admin" })))
            .await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["role"], "customer");
    }

    #[tokio::test]
    async fn profile_conflicts_and_validation() {
        let t = setup().await;
        t.as_user(ALICE, "PATCH", "/auth/me", Some(json!({ "username": "alice" })))
            .await;

        let reply = t
            .as_user(BOB, "PATCH", "/auth/me", Some(json!({ "username": "alice" })))
            .await;
        assert_eq!(reply.status, StatusCode::CONFLICT);

        let reply = t
            .as_user(BOB, "PATCH", "/auth/me", Some(json!({ "email": "bob-at-example" })))
            .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);

        let reply = t
            .send("PATCH", "/auth/me", &[], Some(json!({ "username": "mallory" })))
            .await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    }
}

mod cart {
    use super::*;

    #[tokio::test]
    async fn anonymous_caller_gets_a_session_token() {
        let t = setup().await;

        let first = t.send("GET", "/cart", &[], None).await;
        assert_eq!(first.status, StatusCode::OK);
        let token = first
            .headers
            .get("x-session-token")
            .expect("session token minted")
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(first.body["total_items"], 0);

        let second = t
            .send("GET", "/cart", &[("x-session-token", token.as_str())], None)
            .await;
        assert_eq!(second.status, StatusCode::OK);
        assert!(second.headers.get("x-session-token").is_none());
        assert_eq!(second.body["id"], first.body["id"]);
    }

    #[tokio::test]
    async fn session_token_is_returned_when_the_first_request_fails() {
        let t = setup().await;
        let empty_shelf = t.seed_product("sold-out-bar", 300, 0).await;
        let bar = t.seed_product("milk-bar", 300, 5).await;

        let failed = t
            .send(
                "POST",
                "/cart/items",
                &[],
                Some(json!({ "product_id": empty_shelf.id.to_string(), "quantity": 1 })),
            )
            .await;
        assert_eq!(failed.status, StatusCode::BAD_REQUEST);
        let token = failed
            .headers
            .get("x-session-token")
            .expect("session token minted")
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(t.store.cart_count().await, 1);

        let retry = t
            .send(
                "POST",
                "/cart/items",
                &[("x-session-token", token.as_str())],
                Some(json!({ "product_id": bar.id.to_string(), "quantity": 1 })),
            )
            .await;
        assert_eq!(retry.status, StatusCode::OK);
        assert_eq!(retry.body["total_items"], 1);
        assert_eq!(t.store.cart_count().await, 1);
    }

    #[tokio::test]
    async fn unusable_session_token_is_rejected() {
        let t = setup().await;
        let reply = t
            .send("GET", "/cart", &[("x-session-token", "not a token!")], None)
            .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn add_update_remove_and_clear() {
        let t = setup().await;
        let bar = t.seed_product("milk-bar", 300, 10).await;
        let egg = t.seed_product("white-egg", 500, 10).await;

        t.as_user(
            ALICE,
            "POST",
            "/cart/items",
            Some(json!({ "product_id": bar.id, "quantity": 2 })),
        )
        .await;
        let reply = t
            .as_user(
                ALICE,
                "POST",
                "/cart/items",
                Some(json!({ "product_id": bar.id, "quantity": 1 })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["items"].as_array().unwrap().len(), 1);
        assert_eq!(reply.body["items"][0]["quantity"], 3);
        assert_eq!(reply.body["total_price_cents"], 900);

        let reply = t
            .as_user(
                ALICE,
                "POST",
                "/cart/items",
                Some(json!({ "product_id": egg.id })),
            )
            .await;
        assert_eq!(reply.body["total_items"], 4);
        assert_eq!(reply.body["total_price_cents"], 1400);

        let bar_item = reply.body["items"]
            .as_array()
            .unwrap()
            .iter()
            .find(|i| i["product"]["slug"] == "milk-bar")
            .unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();

        let reply = t
            .as_user(
                ALICE,
                "POST",
                &format!("/cart/items/{bar_item}"),
                Some(json!({ "quantity": 0 })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["total_price_cents"], 500);

        let reply = t
            .as_user(ALICE, "DELETE", &format!("/cart/items/{bar_item}"), None)
            .await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);

        let reply = t.as_user(ALICE, "POST", "/cart/clear", None).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["total_items"], 0);
    }

    #[tokio::test]
    async fn add_item_errors() {
        let t = setup().await;
        let bar = t.seed_product("milk-bar", 300, 2).await;
        let mut sold_out = t.seed_product("sold-out", 300, 2).await;
        sold_out.in_stock = false;
        t.store.update_product(&sold_out).await.unwrap();

        let reply = t
            .as_user(
                ALICE,
                "POST",
                "/cart/items",
                Some(json!({ "product_id": bar.id, "quantity": 3 })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);

        let reply = t
            .as_user(
                ALICE,
                "POST",
                "/cart/items",
                Some(json!({ "product_id": sold_out.id, "quantity": 1 })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);

        let reply = t
            .as_user(
                ALICE,
                "POST",
                "/cart/items",
                Some(json!({ "product_id": ProductId::new(), "quantity": 1 })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);

        let reply = t
            .as_user(
                ALICE,
                "POST",
                "/cart/items",
                Some(json!({ "product_id": "nope", "quantity": 1 })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    }
}

mod orders {
    use super::*;

    async fn fill_cart(t: &TestApp, token: &str, product: &Product, quantity: i64) {
        let reply = t
            .as_user(
                token,
                "POST",
                "/cart/items",
                Some(json!({ "product_id": product.id, "quantity": quantity })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn checkout_requires_authentication() {
        let t = setup().await;
        let reply = t.send("POST", "/orders", &[], None).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn checkout_of_empty_cart_is_rejected() {
        let t = setup().await;
        let reply = t.as_user(ALICE, "POST", "/orders", None).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body["error"], "cart empty");
        assert_eq!(t.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn checkout_creates_order_and_empties_cart() {
        let t = setup().await;
        let bar = t.seed_product("milk-bar", 300, 10).await;
        fill_cart(&t, ALICE, &bar, 2).await;

        let reply = t.as_user(ALICE, "POST", "/orders", None).await;
        assert_eq!(reply.status, StatusCode::CREATED);
        assert_eq!(reply.body["status"], "pending");
        assert_eq!(reply.body["total_price_cents"], 600);
        assert_eq!(reply.body["items"][0]["unit_price_cents"], 300);
        let order_id = reply.body["id"].as_str().unwrap().to_string();

        let cart = t.as_user(ALICE, "GET", "/cart", None).await;
        assert_eq!(cart.body["total_items"], 0);

        let list = t.as_user(ALICE, "GET", "/orders", None).await;
        assert_eq!(list.body.as_array().unwrap().len(), 1);

        let mine = t
            .as_user(ALICE, "GET", &format!("/orders/{order_id}"), None)
            .await;
        assert_eq!(mine.status, StatusCode::OK);

        let theirs = t
            .as_user(BOB, "GET", &format!("/orders/{order_id}"), None)
            .await;
        assert_eq!(theirs.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn failed_checkout_is_a_generic_500() {
        let t = setup().await;
        let bar = t.seed_product("milk-bar", 300, 10).await;
        fill_cart(&t, ALICE, &bar, 1).await;

        t.store.fail_order_items_after(Some(0)).await;
        let reply = t.as_user(ALICE, "POST", "/orders", None).await;
        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(reply.body["error"], "internal server error");

        let cart = t.as_user(ALICE, "GET", "/cart", None).await;
        assert_eq!(cart.body["total_items"], 1);
        assert_eq!(t.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn repricing_does_not_touch_placed_orders() {
        let t = setup().await;
        let bar = t.seed_product("milk-bar", 300, 10).await;
        fill_cart(&t, ALICE, &bar, 1).await;
        let placed = t.as_user(ALICE, "POST", "/orders", None).await;
        let order_id = placed.body["id"].as_str().unwrap().to_string();

        let reply = t
            .as_user(
                ADMIN,
                "PUT",
                &format!("/admin/products/{}", bar.id),
                Some(json!({
                    "name": "milk bar",
                    "slug": "milk-bar",
                    "price_cents": 450,
                    "category_id": t.category.id,
                    "quantity_on_hand": 10
                })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["price_cents"], 450);

        let order = t
            .as_user(ALICE, "GET", &format!("/orders/{order_id}"), None)
            .await;
        assert_eq!(order.body["items"][0]["unit_price_cents"], 300);
        assert_eq!(order.body["total_price_cents"], 300);
    }
}

mod admin {
    use super::*;

    #[tokio::test]
    async fn admin_routes_require_admin_role() {
        let t = setup().await;

        let reply = t.send("GET", "/admin/dashboard", &[], None).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

        let reply = t.as_user(ALICE, "GET", "/admin/dashboard", None).await;
        assert_eq!(reply.status, StatusCode::FORBIDDEN);

        let reply = t.as_user(ADMIN, "GET", "/admin/dashboard", None).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["categories"], 1);
    }

    #[tokio::test]
    async fn create_catalog_entries() {
        let t = setup().await;

        let tag = t
            .as_user(ADMIN, "POST", "/admin/tags", Some(json!({ "name": "Bestseller" })))
            .await;
        assert_eq!(tag.status, StatusCode::CREATED);
        assert_eq!(tag.body["slug"], "bestseller");
        assert_eq!(tag.body["color"], "primary");

        let category = t
            .as_user(
                ADMIN,
                "POST",
                "/admin/categories",
                Some(json!({ "name": "Gift Boxes", "parent_id": t.category.id })),
            )
            .await;
        assert_eq!(category.status, StatusCode::CREATED);
        assert_eq!(category.body["slug"], "gift-boxes");

        let product = t
            .as_user(
                ADMIN,
                "POST",
                "/admin/products",
                Some(json!({
                    "name": "Praline Box",
                    "price_cents": 1200,
                    "old_price_cents": 1500,
                    "category_id": category.body["id"],
                    "tag_ids": [tag.body["id"]],
                    "quantity_on_hand": 5
                })),
            )
            .await;
        assert_eq!(product.status, StatusCode::CREATED);
        assert_eq!(product.body["slug"], "praline-box");
        assert_eq!(product.body["has_discount"], true);

        let duplicate = t
            .as_user(
                ADMIN,
                "POST",
                "/admin/products",
                Some(json!({
                    "name": "Praline box",
                    "price_cents": 900,
                    "category_id": t.category.id
                })),
            )
            .await;
        assert_eq!(duplicate.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn delete_product_rules() {
        let t = setup().await;
        let bar = t.seed_product("milk-bar", 300, 10).await;
        let egg = t.seed_product("white-egg", 300, 10).await;

        t.as_user(
            ALICE,
            "POST",
            "/cart/items",
            Some(json!({ "product_id": bar.id })),
        )
        .await;
        t.as_user(ALICE, "POST", "/orders", None).await;

        let reply = t
            .as_user(ADMIN, "DELETE", &format!("/admin/products/{}", bar.id), None)
            .await;
        assert_eq!(reply.status, StatusCode::CONFLICT);

        let reply = t
            .as_user(ADMIN, "DELETE", &format!("/admin/products/{}", egg.id), None)
            .await;
        assert_eq!(reply.status, StatusCode::NO_CONTENT);

        let reply = t
            .as_user(ADMIN, "DELETE", &format!("/admin/products/{}", egg.id), None)
            .await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn order_status_transitions() {
        let t = setup().await;
        let bar = t.seed_product("milk-bar", 300, 10).await;
        t.as_user(
            ALICE,
            "POST",
            "/cart/items",
            Some(json!({ "product_id": bar.id })),
        )
        .await;
        let placed = t.as_user(ALICE, "POST", "/orders", None).await;
        let uri = format!("/admin/orders/{}/status", placed.body["id"].as_str().unwrap());

        let reply = t
            .as_user(ALICE, "POST", &uri, Some(json!({ "status": "processing" })))
            .await;
        assert_eq!(reply.status, StatusCode::FORBIDDEN);

        let reply = t
            .as_user(ADMIN, "POST", &uri, Some(json!({ "status": "processing" })))
            .await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["status"], "processing");

        let reply = t
            .as_user(ADMIN, "POST", &uri, Some(json!({ "status": "cancelled" })))
            .await;
        assert_eq!(reply.body["status"], "cancelled");

        let reply = t
            .as_user(ADMIN, "POST", &uri, Some(json!({ "status": "completed" })))
            .await;
        assert_eq!(reply.status, StatusCode::CONFLICT);

        let reply = t
            .as_user(ADMIN, "POST", &uri, Some(json!({ "status": "shipped" })))
            .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    }
}

mod catalog {
    use super::*;

    #[tokio::test]
    async fn browse_products_and_categories() {
        let t = setup().await;
        t.seed_product("milk-bar", 300, 10).await;
        t.seed_product("dark-bunny", 900, 10).await;

        let categories = t.send("GET", "/categories", &[], None).await;
        assert_eq!(categories.body.as_array().unwrap().len(), 1);

        let category = t.send("GET", "/categories/chocolate", &[], None).await;
        assert_eq!(category.status, StatusCode::OK);
        let missing = t.send("GET", "/categories/toys", &[], None).await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let by_price = t
            .send(
                "GET",
                "/categories/chocolate/products?ordering=-price",
                &[],
                None,
            )
            .await;
        assert_eq!(by_price.body[0]["slug"], "dark-bunny");

        let found = t.send("GET", "/products?search=BUNNY", &[], None).await;
        assert_eq!(found.body.as_array().unwrap().len(), 1);

        let bad = t.send("GET", "/products?ordering=rating", &[], None).await;
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);

        let newest = t.send("GET", "/products/new", &[], None).await;
        assert_eq!(newest.body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn product_detail_counts_views() {
        let t = setup().await;
        t.seed_product("milk-bar", 300, 10).await;
        t.seed_product("dark-bunny", 900, 10).await;

        t.send("GET", "/products/dark-bunny", &[], None).await;
        let reply = t.send("GET", "/products/dark-bunny", &[], None).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["views_count"], 2);
        assert_eq!(reply.body["price_cents"], 900);

        let popular = t.send("GET", "/products/popular", &[], None).await;
        assert_eq!(popular.body[0]["slug"], "dark-bunny");

        let missing = t.send("GET", "/products/nope", &[], None).await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }
}
