//! Order queries and status administration.

use chrono::Utc;
use common::{Order, OrderId, OrderStatus, Principal};
use store::ShopStore;
use thiserror::Error;

use crate::access::AccessPolicy;
use crate::error::DomainError;

/// Errors raised by order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// Missing, or owned by someone else.
    #[error("order not found: {0}")]
    NotFound(OrderId),

    #[error("cannot move order from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },
}

/// Read access to a user's orders, plus admin status changes.
pub struct OrderQueries<S: ShopStore> {
    store: S,
}

impl<S: ShopStore> OrderQueries<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Lists the caller's orders, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_for(&self, principal: Option<&Principal>) -> Result<Vec<Order>, DomainError> {
        let principal = AccessPolicy::require_authenticated(principal)?;
        Ok(self.store.orders_for_owner(principal.user_id).await?)
    }

    /// Loads one of the caller's orders.
    #[tracing::instrument(skip(self))]
    pub async fn get_for(
        &self,
        principal: Option<&Principal>,
        order_id: OrderId,
    ) -> Result<Order, DomainError> {
        let principal = AccessPolicy::require_authenticated(principal)?;
        match self.store.order(order_id).await? {
            Some(order) if AccessPolicy::can_view_order(principal, &order) => Ok(order),
            _ => Err(OrderError::NotFound(order_id).into()),
        }
    }

    /// Moves an order to `status`. Admin only.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(
        &self,
        principal: Option<&Principal>,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, DomainError> {
        AccessPolicy::require_admin(principal)?;

        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))?;
        if !order.status.can_transition_to(status) {
            return Err(OrderError::InvalidStatusTransition {
                from: order.status,
                to: status,
            }
            .into());
        }

        let updated = self
            .store
            .update_order_status(order_id, status, Utc::now())
            .await?
            .ok_or(OrderError::NotFound(order_id))?;

        tracing::info!(from = %order.status, to = %status, "Order status changed");
        Ok(updated)
    }
}
