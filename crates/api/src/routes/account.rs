//! Account endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use common::{Account, Role, UserId};
use domain::ProfileUpdate;
use serde::{Deserialize, Serialize};
use store::ShopStore;

use crate::AppState;
use crate::auth::MaybePrincipal;
use crate::error::ApiError;

// -- Request/Response types --

/// Profile changes. Absent fields are left as they are; an empty `email`
/// removes it. The role is managed by the identity provider and cannot be
/// set here.
#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.user_id,
            username: account.username,
            email: account.email,
            first_name: account.first_name,
            last_name: account.last_name,
            phone: account.phone,
            role: account.role,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

// -- Handlers --

/// GET /auth/me: the caller's profile, created on first access.
#[tracing::instrument(skip(state))]
pub async fn me<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    MaybePrincipal(principal): MaybePrincipal,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state.shop.accounts.profile(principal.as_ref()).await?;
    Ok(Json(account.into()))
}

/// PATCH /auth/me
#[tracing::instrument(skip(state, req))]
pub async fn update_me<S: ShopStore>(
    State(state): State<Arc<AppState<S>>>,
    MaybePrincipal(principal): MaybePrincipal,
    Json(req): Json<ProfileRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let update = ProfileUpdate {
        username: req.username,
        email: req.email,
        first_name: req.first_name,
        last_name: req.last_name,
        phone: req.phone,
    };
    let account = state
        .shop
        .accounts
        .update_profile(principal.as_ref(), update)
        .await?;
    Ok(Json(account.into()))
}
