//! Domain layer for the storefront.
//!
//! This crate provides the behaviour on top of the storage traits:
//! - Cart engine with per-cart serialization
//! - Checkout converting a cart into an order with price snapshots
//! - Catalog browsing and administration
//! - Order queries and status changes
//! - Access policy and the identity provider seam
//! - User profiles

pub mod access;
pub mod accounts;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod error;
pub mod identity;
pub mod locks;
pub mod orders;

pub use access::{AccessError, AccessPolicy};
pub use accounts::{AccountError, AccountService, ProfileUpdate};
pub use cart::{CartEngine, CartError, CartTotals, CartView, compute_totals, resolve_identity};
pub use catalog::{
    CatalogError, CatalogService, CategoryDraft, Dashboard, ProductDraft, ProductFilter, TagDraft,
};
pub use checkout::{CheckoutError, CheckoutService};
pub use error::DomainError;
pub use identity::{IdentityConfigError, IdentityProvider, StaticIdentityProvider};
pub use locks::CartLocks;
pub use orders::{OrderError, OrderQueries};

use store::ShopStore;

/// The storefront services over one store, sharing a single lock registry.
pub struct Storefront<S: ShopStore> {
    pub cart: CartEngine<S>,
    pub checkout: CheckoutService<S>,
    pub catalog: CatalogService<S>,
    pub orders: OrderQueries<S>,
    pub accounts: AccountService<S>,
}

impl<S: ShopStore> Storefront<S> {
    pub fn new(store: S) -> Self {
        let locks = CartLocks::new();
        Self {
            cart: CartEngine::new(store.clone(), locks.clone()),
            checkout: CheckoutService::new(store.clone(), locks),
            catalog: CatalogService::new(store.clone()),
            orders: OrderQueries::new(store.clone()),
            accounts: AccountService::new(store),
        }
    }
}
