//! Catalog administration and order status endpoints. Admin role required.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{Category, CategoryId, Money, OrderStatus, Tag, TagId};
use domain::{CategoryDraft, Dashboard, ProductDraft, TagDraft};
use serde::Deserialize;
use store::ShopStore;

use super::catalog::ProductResponse;
use super::orders::OrderResponse;
use super::parse_id;
use crate::AppState;
use crate::auth::MaybePrincipal;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct ProductRequest {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub short_description: String,
    pub price_cents: i64,
    #[serde(default)]
    pub old_price_cents: Option<i64>,
    pub category_id: String,
    #[serde(default)]
    pub tag_ids: Vec<String>,
    #[serde(default)]
    pub weight_grams: u32,
    #[serde(default)]
    pub quantity_on_hand: u32,
    #[serde(default = "default_true")]
    pub in_stock: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct CategoryRequest {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub sort_order: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct TagRequest {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

fn default_true() -> bool {
    true
}

impl ProductRequest {
    fn into_draft(self) -> Result<ProductDraft, ApiError> {
        let category_id: CategoryId = parse_id(&self.category_id, "category_id")?;
        let tag_ids = self
            .tag_ids
            .iter()
            .map(|raw| parse_id::<TagId>(raw, "tag id"))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ProductDraft {
            name: self.name,
            slug: self.slug,
            description: self.description,
            short_description: self.short_description,
            price: Money::from_cents(self.price_cents),
            old_price: self.old_price_cents.map(Money::from_cents),
            category_id,
            tag_ids,
            weight_grams: self.weight_grams,
            quantity_on_hand: self.quantity_on_hand,
            in_stock: self.in_stock,
            is_active: self.is_active,
        })
    }
}

// -- Handlers --

/// GET /admin/dashboard
pub async fn dashboard<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    MaybePrincipal(principal): MaybePrincipal,
) -> Result<Json<Dashboard>, ApiError> {
    Ok(Json(state.shop.catalog.dashboard(principal.as_ref()).await?))
}

/// POST /admin/products
#[tracing::instrument(skip(state, req))]
pub async fn create_product<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    MaybePrincipal(principal): MaybePrincipal,
    Json(req): Json<ProductRequest>,
) -> Result<(StatusCode, Json<ProductResponse>), ApiError> {
    let draft = req.into_draft()?;
    let product = state
        .shop
        .catalog
        .create_product(principal.as_ref(), draft)
        .await?;
    Ok((StatusCode::CREATED, Json(product.into())))
}

/// PUT /admin/products/{id}
#[tracing::instrument(skip(state, req))]
pub async fn update_product<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    MaybePrincipal(principal): MaybePrincipal,
    Path(id): Path<String>,
    Json(req): Json<ProductRequest>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product_id = parse_id(&id, "product id")?;
    let draft = req.into_draft()?;
    let product = state
        .shop
        .catalog
        .update_product(principal.as_ref(), product_id, draft)
        .await?;
    Ok(Json(product.into()))
}

/// DELETE /admin/products/{id}
#[tracing::instrument(skip(state))]
pub async fn delete_product<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    MaybePrincipal(principal): MaybePrincipal,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let product_id = parse_id(&id, "product id")?;
    state
        .shop
        .catalog
        .delete_product(principal.as_ref(), product_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/categories
#[tracing::instrument(skip(state, req))]
pub async fn create_category<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    MaybePrincipal(principal): MaybePrincipal,
    Json(req): Json<CategoryRequest>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    let parent_id = req
        .parent_id
        .as_deref()
        .map(|raw| parse_id::<CategoryId>(raw, "parent_id"))
        .transpose()?;
    let draft = CategoryDraft {
        name: req.name,
        slug: req.slug,
        description: req.description,
        parent_id,
        sort_order: req.sort_order,
        is_active: req.is_active,
    };

    let category = state
        .shop
        .catalog
        .create_category(principal.as_ref(), draft)
        .await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// POST /admin/tags
#[tracing::instrument(skip(state, req))]
pub async fn create_tag<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    MaybePrincipal(principal): MaybePrincipal,
    Json(req): Json<TagRequest>,
) -> Result<(StatusCode, Json<Tag>), ApiError> {
    let draft = TagDraft {
        name: req.name,
        slug: req.slug,
        color: req.color,
    };
    let tag = state
        .shop
        .catalog
        .create_tag(principal.as_ref(), draft)
        .await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

/// POST /admin/orders/{id}/status
#[tracing::instrument(skip(state))]
pub async fn update_order_status<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    MaybePrincipal(principal): MaybePrincipal,
    Path(id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_id(&id, "order id")?;
    let status: OrderStatus = req.status.parse().map_err(ApiError::BadRequest)?;
    let order = state
        .shop
        .orders
        .update_status(principal.as_ref(), order_id, status)
        .await?;
    Ok(Json(order.into()))
}
