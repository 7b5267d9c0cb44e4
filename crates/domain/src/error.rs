//! Domain error types.

use store::StoreError;
use thiserror::Error;

use crate::access::AccessError;
use crate::accounts::AccountError;
use crate::cart::CartError;
use crate::catalog::CatalogError;
use crate::checkout::CheckoutError;
use crate::orders::OrderError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Account(#[from] AccountError),

    /// An error occurred in the storage backend.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl DomainError {
    /// Returns true for failures the caller did not cause.
    pub fn is_internal(&self) -> bool {
        matches!(self, DomainError::Store(_))
    }
}
