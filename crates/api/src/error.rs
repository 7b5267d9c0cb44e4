//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{
    AccessError, AccountError, CartError, CatalogError, CheckoutError, DomainError, OrderError,
};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Missing or unusable credentials.
    Unauthorized(String),
    /// Domain logic error.
    Domain(DomainError),
    /// Internal server error.
    Internal(String),
}

const INTERNAL_MESSAGE: &str = "internal server error";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE.to_string())
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    let status = match &err {
        DomainError::Access(AccessError::Unauthenticated) => StatusCode::UNAUTHORIZED,
        DomainError::Access(AccessError::Forbidden) => StatusCode::FORBIDDEN,
        DomainError::Cart(cart_err) => match cart_err {
            CartError::ProductNotFound(_) | CartError::ItemNotFound(_) => StatusCode::NOT_FOUND,
            CartError::IdentityMissing
            | CartError::OutOfStock(_)
            | CartError::InsufficientQuantity { .. }
            | CartError::InvalidQuantity(_)
            | CartError::TotalOutOfRange => StatusCode::BAD_REQUEST,
        },
        DomainError::Checkout(CheckoutError::EmptyCart) => StatusCode::BAD_REQUEST,
        DomainError::Catalog(catalog_err) => match catalog_err {
            CatalogError::CategoryNotFound(_) | CatalogError::ProductNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            CatalogError::InvalidOrdering(_) | CatalogError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            CatalogError::SlugTaken(_) | CatalogError::ProductInUse(_) => StatusCode::CONFLICT,
        },
        DomainError::Order(OrderError::NotFound(_)) => StatusCode::NOT_FOUND,
        DomainError::Order(OrderError::InvalidStatusTransition { .. }) => StatusCode::CONFLICT,
        DomainError::Account(AccountError::Validation(_)) => StatusCode::BAD_REQUEST,
        DomainError::Account(AccountError::UsernameTaken(_) | AccountError::EmailTaken(_)) => {
            StatusCode::CONFLICT
        }
        DomainError::Store(store_err) => {
            tracing::error!(error = %store_err, "storage failure");
            return (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE.to_string());
        }
    };

    (status, err.to_string())
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}
