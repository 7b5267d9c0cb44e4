//! HTTP route handlers.

pub mod account;
pub mod admin;
pub mod cart;
pub mod catalog;
pub mod ops;
pub mod orders;

use std::str::FromStr;

use crate::error::ApiError;

/// Parses an id from a path or body, reporting a 400 on failure.
pub(crate) fn parse_id<T>(raw: &str, what: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = uuid::Error>,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {what}: {e}")))
}
