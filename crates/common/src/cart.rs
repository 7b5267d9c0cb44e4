//! Cart entities and the identity a cart is keyed by.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CartId, CartItemId, Money, Product, ProductId, UserId};

/// Opaque token identifying an anonymous shopper's session.
///
/// Minted by the serving layer on first contact. A usable token is 1 to 64
/// characters drawn from ASCII alphanumerics, `-` and `_`.
///
/// The token is a bearer credential for its cart, so `Debug` never prints it.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub const MAX_LEN: usize = 64;

    /// Parses a token, returning `None` if it is empty, too long, or contains
    /// characters outside the allowed set.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let valid = !raw.is_empty()
            && raw.len() <= Self::MAX_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(raw.to_string()))
    }

    /// Mints a fresh random token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(***)")
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The key a cart is located by: an authenticated user or an anonymous session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CartIdentity {
    User(UserId),
    Session(SessionToken),
}

impl CartIdentity {
    /// Picks the identity a request's cart belongs to.
    ///
    /// An authenticated user wins over a session token. Returns `None` when
    /// neither is present.
    pub fn resolve(user: Option<UserId>, session: Option<SessionToken>) -> Option<Self> {
        match (user, session) {
            (Some(user_id), _) => Some(CartIdentity::User(user_id)),
            (None, Some(token)) => Some(CartIdentity::Session(token)),
            (None, None) => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CartIdentity::User(_) => "user",
            CartIdentity::Session(_) => "session",
        }
    }
}

impl std::fmt::Display for CartIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CartIdentity::User(id) => write!(f, "user:{id}"),
            CartIdentity::Session(_) => f.write_str("session:***"),
        }
    }
}

/// A shopping cart header. Line items are stored separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub owner: CartIdentity,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single product line in a cart. At most one per product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub added_at: DateTime<Utc>,
}

/// A cart item joined with the live product it refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub item: CartItem,
    pub product: Product,
}

impl CartLine {
    /// Line total at the product's current price.
    pub fn total_price(&self) -> Money {
        self.product.price.multiply(self.item.quantity)
    }
}
