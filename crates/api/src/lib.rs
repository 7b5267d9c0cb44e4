//! HTTP API server for the storefront.
//!
//! Provides REST endpoints for the catalog, carts, checkout, order history,
//! user profiles and catalog administration, with structured logging (tracing) and
//! Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use domain::{IdentityProvider, Storefront};
use metrics_exporter_prometheus::PrometheusHandle;
use store::ShopStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: ShopStore> {
    pub shop: Storefront<S>,
    pub identity: Arc<dyn IdentityProvider>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: ShopStore>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health::<S>))
        // Account
        .route(
            "/auth/me",
            get(routes::account::me::<S>).patch(routes::account::update_me::<S>),
        )
        // Catalog
        .route("/categories", get(routes::catalog::categories::<S>))
        .route("/categories/{slug}", get(routes::catalog::category::<S>))
        .route(
            "/categories/{slug}/products",
            get(routes::catalog::category_products::<S>),
        )
        .route("/products", get(routes::catalog::products::<S>))
        .route("/products/popular", get(routes::catalog::popular::<S>))
        .route("/products/new", get(routes::catalog::newest::<S>))
        .route("/products/discounted", get(routes::catalog::discounted::<S>))
        .route("/products/{slug}", get(routes::catalog::product::<S>))
        // Cart
        .route("/cart", get(routes::cart::get::<S>))
        .route("/cart/items", post(routes::cart::add_item::<S>))
        .route(
            "/cart/items/{item_id}",
            post(routes::cart::update_item::<S>).delete(routes::cart::remove_item::<S>),
        )
        .route("/cart/clear", post(routes::cart::clear::<S>))
        // Orders
        .route(
            "/orders",
            post(routes::orders::create::<S>).get(routes::orders::list::<S>),
        )
        .route("/orders/{id}", get(routes::orders::get::<S>))
        // Administration
        .route("/admin/dashboard", get(routes::admin::dashboard::<S>))
        .route("/admin/products", post(routes::admin::create_product::<S>))
        .route(
            "/admin/products/{id}",
            put(routes::admin::update_product::<S>).delete(routes::admin::delete_product::<S>),
        )
        .route("/admin/categories", post(routes::admin::create_category::<S>))
        .route("/admin/tags", post(routes::admin::create_tag::<S>))
        .route(
            "/admin/orders/{id}/status",
            post(routes::admin::update_order_status::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([auth::SESSION_HEADER]),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over `store`.
pub fn create_state<S: ShopStore>(
    store: S,
    identity: Arc<dyn IdentityProvider>,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        shop: Storefront::new(store),
        identity,
    })
}
