//! Role and ownership checks gating who may call what.

use common::{Order, Principal};
use thiserror::Error;

/// Access was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccessError {
    /// No authenticated caller.
    #[error("authentication required")]
    Unauthenticated,

    /// Authenticated, but not allowed.
    #[error("admin role required")]
    Forbidden,
}

/// Stateless access rules.
///
/// Catalog reads and cart operations are open to everyone; cart identity
/// resolution is their only gate. Orders require an authenticated caller and
/// are only visible to their owner. Catalog administration and order status
/// changes require the admin role.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicy;

impl AccessPolicy {
    /// Requires an authenticated caller.
    pub fn require_authenticated(principal: Option<&Principal>) -> Result<&Principal, AccessError> {
        principal.ok_or(AccessError::Unauthenticated)
    }

    /// Requires an authenticated caller with the admin role.
    pub fn require_admin(principal: Option<&Principal>) -> Result<&Principal, AccessError> {
        let principal = Self::require_authenticated(principal)?;
        if principal.is_admin() {
            Ok(principal)
        } else {
            Err(AccessError::Forbidden)
        }
    }

    /// Returns true if `principal` may see `order`.
    ///
    /// Callers report a refusal as "not found" so order ids owned by someone
    /// else cannot be discovered.
    pub fn can_view_order(principal: &Principal, order: &Order) -> bool {
        order.owner == principal.user_id
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::{OrderId, OrderStatus, UserId};

    use super::*;

    fn order_owned_by(owner: UserId) -> Order {
        let now = Utc::now();
        Order {
            id: OrderId::new(),
            owner,
            status: OrderStatus::Pending,
            items: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn anonymous_callers_are_unauthenticated() {
        assert_eq!(
            AccessPolicy::require_authenticated(None),
            Err(AccessError::Unauthenticated)
        );
        assert_eq!(
            AccessPolicy::require_admin(None),
            Err(AccessError::Unauthenticated)
        );
    }

    #[test]
    fn customers_are_forbidden_from_admin() {
        let customer = Principal::customer(UserId::new());
        assert_eq!(
            AccessPolicy::require_admin(Some(&customer)),
            Err(AccessError::Forbidden)
        );

        let admin = Principal::admin(UserId::new());
        assert_eq!(AccessPolicy::require_admin(Some(&admin)), Ok(&admin));
    }

    #[test]
    fn only_the_owner_sees_an_order() {
        let owner = Principal::customer(UserId::new());
        let stranger = Principal::customer(UserId::new());
        let admin = Principal::admin(UserId::new());
        let order = order_owned_by(owner.user_id);

        assert!(AccessPolicy::can_view_order(&owner, &order));
        assert!(!AccessPolicy::can_view_order(&stranger, &order));
        assert!(!AccessPolicy::can_view_order(&admin, &order));
    }
}
