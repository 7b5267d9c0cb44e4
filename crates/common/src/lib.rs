//! Shared value types and entities for the storefront backend.
//!
//! Everything here is plain data: identifiers, money, catalog entities,
//! carts, orders, accounts and the authenticated principal. Behaviour lives in the
//! `domain` crate and persistence in the `store` crate.

pub mod account;
pub mod cart;
pub mod catalog;
pub mod money;
pub mod order;
pub mod principal;
pub mod slug;
pub mod types;

pub use account::Account;
pub use cart::{Cart, CartIdentity, CartItem, CartLine, SessionToken};
pub use catalog::{Category, Product, Tag};
pub use money::Money;
pub use order::{NewOrder, NewOrderItem, Order, OrderItem, OrderStatus};
pub use principal::{Principal, Role};
pub use slug::slugify;
pub use types::{CartId, CartItemId, CategoryId, OrderId, ProductId, TagId, UserId};
