//! Public catalog endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use common::{Category, CategoryId, Product, ProductId, TagId};
use domain::ProductFilter;
use serde::{Deserialize, Serialize};
use store::ShopStore;

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Default, Deserialize)]
pub struct ProductListParams {
    pub category: Option<String>,
    pub tag: Option<String>,
    pub in_stock: Option<bool>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CategoryProductsParams {
    pub tag: Option<String>,
    pub ordering: Option<String>,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub short_description: String,
    pub price_cents: i64,
    pub old_price_cents: Option<i64>,
    pub has_discount: bool,
    pub category_id: CategoryId,
    pub tag_ids: Vec<TagId>,
    pub weight_grams: u32,
    pub quantity_on_hand: u32,
    pub in_stock: bool,
    pub is_active: bool,
    pub views_count: u64,
    pub orders_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        Self {
            has_discount: product.has_discount(),
            id: product.id,
            name: product.name,
            slug: product.slug,
            description: product.description,
            short_description: product.short_description,
            price_cents: product.price.cents(),
            old_price_cents: product.old_price.map(|p| p.cents()),
            category_id: product.category_id,
            tag_ids: product.tag_ids,
            weight_grams: product.weight_grams,
            quantity_on_hand: product.quantity_on_hand,
            in_stock: product.in_stock,
            is_active: product.is_active,
            views_count: product.views_count,
            orders_count: product.orders_count,
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

fn product_list(products: Vec<Product>) -> Json<Vec<ProductResponse>> {
    Json(products.into_iter().map(ProductResponse::from).collect())
}

// -- Handlers --

/// GET /categories
pub async fn categories<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<Category>>, ApiError> {
    Ok(Json(state.shop.catalog.list_categories().await?))
}

/// GET /categories/{slug}
pub async fn category<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(slug): Path<String>,
) -> Result<Json<Category>, ApiError> {
    Ok(Json(state.shop.catalog.category(&slug).await?))
}

/// GET /categories/{slug}/products
#[tracing::instrument(skip(state))]
pub async fn category_products<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(slug): Path<String>,
    Query(params): Query<CategoryProductsParams>,
) -> Result<Json<Vec<ProductResponse>>, ApiError> {
    let products = state
        .shop
        .catalog
        .category_products(&slug, params.tag.as_deref(), params.ordering.as_deref())
        .await?;
    Ok(product_list(products))
}

/// GET /products
#[tracing::instrument(skip(state))]
pub async fn products<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ProductListParams>,
) -> Result<Json<Vec<ProductResponse>>, ApiError> {
    let filter = ProductFilter {
        category: params.category.filter(|s| !s.is_empty()),
        tag: params.tag.filter(|s| !s.is_empty()),
        in_stock: params.in_stock,
        search: params.search,
        ordering: params.ordering,
    };
    Ok(product_list(state.shop.catalog.list_products(&filter).await?))
}

/// GET /products/popular
pub async fn popular<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<ProductResponse>>, ApiError> {
    Ok(product_list(state.shop.catalog.popular().await?))
}

/// GET /products/new
pub async fn newest<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<ProductResponse>>, ApiError> {
    Ok(product_list(state.shop.catalog.newest().await?))
}

/// GET /products/discounted
pub async fn discounted<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<ProductResponse>>, ApiError> {
    Ok(product_list(state.shop.catalog.discounted().await?))
}

/// GET /products/{slug}: counts a view.
#[tracing::instrument(skip(state))]
pub async fn product<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(slug): Path<String>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product = state.shop.catalog.product_detail(&slug).await?;
    Ok(Json(product.into()))
}
