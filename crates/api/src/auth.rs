//! Request extractors resolving who is calling.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, HeaderName};
use axum::http::request::Parts;
use common::{CartIdentity, Principal, SessionToken};
use domain::resolve_identity;
use store::ShopStore;

use crate::AppState;
use crate::error::ApiError;

/// Header carrying an anonymous shopper's session token.
pub const SESSION_HEADER: HeaderName = HeaderName::from_static("x-session-token");

/// The authenticated caller, if the request carries a bearer token.
///
/// A present but invalid token is rejected with 401 rather than treated as
/// anonymous.
#[derive(Debug, Clone, Copy)]
pub struct MaybePrincipal(pub Option<Principal>);

impl<S: ShopStore> FromRequestParts<Arc<AppState<S>>> for MaybePrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            return Ok(Self(None));
        };

        let token = header
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("malformed authorization header".to_string()))?;

        match state.identity.authenticate(token).await {
            Some(principal) => Ok(Self(Some(principal))),
            None => Err(ApiError::Unauthorized("invalid credentials".to_string())),
        }
    }
}

/// Whose cart a request addresses.
///
/// Anonymous callers without a session get a freshly minted token, which the
/// handler returns in the response header.
#[derive(Debug, Clone)]
pub struct CartOwner {
    pub identity: CartIdentity,
    pub minted: Option<SessionToken>,
}

impl<S: ShopStore> FromRequestParts<Arc<AppState<S>>> for CartOwner {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let MaybePrincipal(principal) = MaybePrincipal::from_request_parts(parts, state).await?;

        let (session, minted) = match parts.headers.get(&SESSION_HEADER) {
            // An unusable token yields no session; identity resolution decides.
            Some(value) => (value.to_str().ok().and_then(SessionToken::parse), None),
            None if principal.is_none() => {
                let token = SessionToken::generate();
                metrics::counter!("sessions_minted_total").increment(1);
                (Some(token.clone()), Some(token))
            }
            None => (None, None),
        };

        let identity =
            resolve_identity(principal.as_ref(), session).map_err(|e| ApiError::Domain(e.into()))?;
        Ok(Self { identity, minted })
    }
}
