//! Checkout: converting a user's cart into an order.

use std::time::Instant;

use chrono::Utc;
use common::{CartIdentity, Order, Principal, UserId};
use store::ShopStore;
use thiserror::Error;

use crate::access::AccessPolicy;
use crate::cart::{CartError, compute_totals};
use crate::error::DomainError;
use crate::locks::CartLocks;

/// Errors raised by checkout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckoutError {
    #[error("cart empty")]
    EmptyCart,
}

/// Places orders from carts.
///
/// The store snapshots the cart's lines, writes the order and its items and
/// empties the cart as one unit. The cart lock is held throughout so the
/// totals checked here are the totals of the lines that get ordered.
pub struct CheckoutService<S: ShopStore> {
    store: S,
    locks: CartLocks,
}

impl<S: ShopStore> CheckoutService<S> {
    pub fn new(store: S, locks: CartLocks) -> Self {
        Self { store, locks }
    }

    /// Converts the caller's cart into a pending order.
    #[tracing::instrument(skip(self))]
    pub async fn checkout(&self, principal: Option<&Principal>) -> Result<Order, DomainError> {
        let principal = AccessPolicy::require_authenticated(principal)?;
        let start = Instant::now();

        let result = self.place(principal.user_id).await;

        match &result {
            Ok(order) => {
                metrics::counter!("checkouts_total").increment(1);
                metrics::histogram!("checkout_duration_seconds")
                    .record(start.elapsed().as_secs_f64());
                tracing::info!(
                    order_id = %order.id,
                    items = order.items.len(),
                    total_cents = order.total_price().cents(),
                    "Order placed"
                );
            }
            Err(e) => {
                let reason = match e {
                    DomainError::Checkout(CheckoutError::EmptyCart) => "empty_cart",
                    DomainError::Cart(CartError::TotalOutOfRange) => "total_out_of_range",
                    _ => "storage",
                };
                metrics::counter!("checkout_failures_total", "reason" => reason).increment(1);
                tracing::warn!(error = %e, "Checkout failed");
            }
        }

        result
    }

    async fn place(&self, user_id: UserId) -> Result<Order, DomainError> {
        let identity = CartIdentity::User(user_id);
        let Some(cart) = self.store.find_cart(&identity).await? else {
            return Err(CheckoutError::EmptyCart.into());
        };

        let guard = self.locks.lock(cart.id).await;

        let lines = self.store.cart_lines(cart.id).await?;
        if lines.is_empty() {
            return Err(CheckoutError::EmptyCart.into());
        }
        compute_totals(&lines)?;

        let placed = self.store.place_order(user_id, cart.id, Utc::now()).await?;
        drop(guard);
        let Some(order) = placed else {
            return Err(CheckoutError::EmptyCart.into());
        };

        self.record_order_counts(&order).await;
        Ok(order)
    }

    /// Bumps each product's ordered-units counter. Runs after the commit; a
    /// failure here leaves the order in place.
    async fn record_order_counts(&self, order: &Order) {
        for item in &order.items {
            if let Err(e) = self.store.record_orders(item.product_id, item.quantity).await {
                tracing::warn!(
                    order_id = %order.id,
                    product_id = %item.product_id,
                    error = %e,
                    "Failed to update product order count"
                );
            }
        }
    }
}
