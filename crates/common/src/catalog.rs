//! Catalog entities: categories, tags and products.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CategoryId, Money, ProductId, TagId};

/// A product category. Categories may nest through `parent_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub parent_id: Option<CategoryId>,
    /// Position in listings; categories are ordered by `(sort_order, name)`.
    pub sort_order: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A label attached to products, e.g. "bestseller" or "new".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub slug: String,
    /// CSS class used by the storefront to render the badge.
    pub color: String,
}

impl Tag {
    /// Badge color used when none is given.
    pub const DEFAULT_COLOR: &'static str = "primary";
}

/// A sellable catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub short_description: String,
    pub price: Money,
    /// Price before a discount, if the product is discounted.
    pub old_price: Option<Money>,
    pub category_id: CategoryId,
    pub tag_ids: Vec<TagId>,
    pub weight_grams: u32,
    pub quantity_on_hand: u32,
    pub in_stock: bool,
    pub is_active: bool,
    pub views_count: u64,
    pub orders_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns true if the product can be put in a cart at all.
    ///
    /// Inactive or out-of-stock products are never purchasable.
    pub fn is_purchasable(&self) -> bool {
        self.is_active && self.in_stock
    }

    /// Returns true if an old price is recorded and it is above the current one.
    pub fn has_discount(&self) -> bool {
        self.old_price.is_some_and(|old| old > self.price)
    }
}
