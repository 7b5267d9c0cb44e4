//! Cart endpoints, open to authenticated and anonymous callers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use common::{CartId, CartItemId};
use domain::CartView;
use serde::{Deserialize, Serialize};
use store::ShopStore;

use super::catalog::ProductResponse;
use super::parse_id;
use crate::AppState;
use crate::auth::{CartOwner, SESSION_HEADER};
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: i64,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub id: CartId,
    pub items: Vec<CartItemResponse>,
    pub total_price_cents: i64,
    pub total_items: u64,
}

#[derive(Debug, Serialize)]
pub struct CartItemResponse {
    pub id: CartItemId,
    pub product: ProductResponse,
    pub quantity: u32,
    pub total_price_cents: i64,
}

impl From<CartView> for CartResponse {
    fn from(view: CartView) -> Self {
        Self {
            id: view.cart.id,
            total_price_cents: view.totals.total_price.cents(),
            total_items: view.totals.total_items,
            items: view
                .lines
                .into_iter()
                .map(|line| CartItemResponse {
                    id: line.item.id,
                    quantity: line.item.quantity,
                    total_price_cents: line.total_price().cents(),
                    product: line.product.into(),
                })
                .collect(),
        }
    }
}

/// Renders a cart result, handing a newly minted session token back to the
/// client. The token is attached to error responses too: the cart it names
/// may already exist.
fn respond(owner: &CartOwner, result: Result<CartView, ApiError>) -> Response {
    let mut response = match result {
        Ok(view) => Json(CartResponse::from(view)).into_response(),
        Err(err) => err.into_response(),
    };
    if let Some(ref token) = owner.minted
        && let Ok(value) = HeaderValue::from_str(token.as_str())
    {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

// -- Handlers --

/// GET /cart
#[tracing::instrument(skip(state, owner), fields(owner = owner.identity.kind()))]
pub async fn get<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    owner: CartOwner,
) -> Response {
    let result = async {
        let cart = state.shop.cart.resolve_cart(&owner.identity).await?;
        Ok::<_, ApiError>(state.shop.cart.view(&cart).await?)
    }
    .await;
    respond(&owner, result)
}

/// POST /cart/items: adds to an existing line or creates one.
#[tracing::instrument(skip(state, owner), fields(owner = owner.identity.kind()))]
pub async fn add_item<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    owner: CartOwner,
    Json(req): Json<AddItemRequest>,
) -> Response {
    let result = async {
        let product_id = parse_id(&req.product_id, "product_id")?;
        let cart = state.shop.cart.resolve_cart(&owner.identity).await?;
        let view = state
            .shop
            .cart
            .add_item(&cart, product_id, req.quantity)
            .await?;
        Ok::<_, ApiError>(view)
    }
    .await;
    respond(&owner, result)
}

/// POST /cart/items/{item_id}: sets the quantity; zero or less removes the line.
#[tracing::instrument(skip(state, owner), fields(owner = owner.identity.kind()))]
pub async fn update_item<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    owner: CartOwner,
    Path(item_id): Path<String>,
    Json(req): Json<UpdateItemRequest>,
) -> Response {
    let result = async {
        let item_id = parse_id(&item_id, "item id")?;
        let cart = state.shop.cart.resolve_cart(&owner.identity).await?;
        let view = state
            .shop
            .cart
            .update_item_quantity(&cart, item_id, req.quantity)
            .await?;
        Ok::<_, ApiError>(view)
    }
    .await;
    respond(&owner, result)
}

/// DELETE /cart/items/{item_id}
#[tracing::instrument(skip(state, owner), fields(owner = owner.identity.kind()))]
pub async fn remove_item<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    owner: CartOwner,
    Path(item_id): Path<String>,
) -> Response {
    let result = async {
        let item_id = parse_id(&item_id, "item id")?;
        let cart = state.shop.cart.resolve_cart(&owner.identity).await?;
        Ok::<_, ApiError>(state.shop.cart.remove_item(&cart, item_id).await?)
    }
    .await;
    respond(&owner, result)
}

/// POST /cart/clear
#[tracing::instrument(skip(state, owner), fields(owner = owner.identity.kind()))]
pub async fn clear<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    owner: CartOwner,
) -> Response {
    let result = async {
        let cart = state.shop.cart.resolve_cart(&owner.identity).await?;
        Ok::<_, ApiError>(state.shop.cart.clear(&cart).await?)
    }
    .await;
    respond(&owner, result)
}
