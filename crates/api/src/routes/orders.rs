//! Order placement and order history endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{Order, OrderId, OrderStatus, ProductId, UserId};
use serde::Serialize;
use store::ShopStore;

use super::parse_id;
use crate::AppState;
use crate::auth::MaybePrincipal;
use crate::error::ApiError;

// -- Response types --

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: OrderId,
    pub owner: UserId,
    pub status: OrderStatus,
    pub items: Vec<OrderItemResponse>,
    pub total_price_cents: i64,
    pub total_items: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub total_price_cents: i64,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            total_price_cents: order.total_price().cents(),
            total_items: order.total_items(),
            id: order.id,
            owner: order.owner,
            status: order.status,
            items: order
                .items
                .into_iter()
                .map(|item| OrderItemResponse {
                    total_price_cents: item.total_price().cents(),
                    product_id: item.product_id,
                    product_name: item.product_name,
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                })
                .collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

// -- Handlers --

/// POST /orders: checks out the caller's cart.
#[tracing::instrument(skip(state))]
pub async fn create<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    MaybePrincipal(principal): MaybePrincipal,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let order = state.shop.checkout.checkout(principal.as_ref()).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /orders: the caller's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    MaybePrincipal(principal): MaybePrincipal,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.shop.orders.list_for(principal.as_ref()).await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    MaybePrincipal(principal): MaybePrincipal,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_id(&id, "order id")?;
    let order = state
        .shop
        .orders
        .get_for(principal.as_ref(), order_id)
        .await?;
    Ok(Json(order.into()))
}
