use std::cmp::Ordering;

use common::{CategoryId, Product, TagId};

/// Product attribute a listing can be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    Price,
    #[default]
    CreatedAt,
    ViewsCount,
    OrdersCount,
    Name,
}

impl SortField {
    /// Column name in the `products` table.
    pub fn column(&self) -> &'static str {
        match self {
            SortField::Price => "price_cents",
            SortField::CreatedAt => "created_at",
            SortField::ViewsCount => "views_count",
            SortField::OrdersCount => "orders_count",
            SortField::Name => "name",
        }
    }

    fn compare(&self, a: &Product, b: &Product) -> Ordering {
        match self {
            SortField::Price => a.price.cmp(&b.price),
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::ViewsCount => a.views_count.cmp(&b.views_count),
            SortField::OrdersCount => a.orders_count.cmp(&b.orders_count),
            SortField::Name => a.name.cmp(&b.name),
        }
    }
}

/// Sort order of a product listing.
///
/// Parsed from strings such as `"price"` or `"-created_at"`; a leading `-`
/// means descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductOrdering {
    pub field: SortField,
    pub descending: bool,
}

impl ProductOrdering {
    pub fn ascending(field: SortField) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    pub fn descending(field: SortField) -> Self {
        Self {
            field,
            descending: true,
        }
    }

    /// Parses an ordering expression. Returns `None` for unknown fields.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (descending, name) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let field = match name {
            "price" => SortField::Price,
            "created_at" => SortField::CreatedAt,
            "views_count" => SortField::ViewsCount,
            "orders_count" => SortField::OrdersCount,
            "name" => SortField::Name,
            _ => return None,
        };
        Some(Self { field, descending })
    }

    /// Compares two products; ties are broken by id so listings are stable.
    pub fn compare(&self, a: &Product, b: &Product) -> Ordering {
        let primary = self.field.compare(a, b);
        let primary = if self.descending {
            primary.reverse()
        } else {
            primary
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

impl Default for ProductOrdering {
    fn default() -> Self {
        Self::descending(SortField::CreatedAt)
    }
}

/// Builder for product listing queries.
///
/// By default only active products are returned, newest first.
#[derive(Debug, Clone, Default)]
pub struct ProductQuery {
    /// Filter by category.
    pub category_id: Option<CategoryId>,

    /// Filter to products carrying this tag.
    pub tag_id: Option<TagId>,

    /// Filter by the in-stock flag.
    pub in_stock: Option<bool>,

    /// Case-insensitive substring match over name and descriptions.
    pub search: Option<String>,

    /// Only products with an old price recorded.
    pub discounted_only: bool,

    /// Include inactive products (administration only).
    pub include_inactive: bool,

    pub ordering: ProductOrdering,

    /// Maximum number of products to return.
    pub limit: Option<usize>,
}

impl ProductQuery {
    /// Creates a new query over active products.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, id: CategoryId) -> Self {
        self.category_id = Some(id);
        self
    }

    pub fn tag(mut self, id: TagId) -> Self {
        self.tag_id = Some(id);
        self
    }

    pub fn in_stock(mut self, in_stock: bool) -> Self {
        self.in_stock = Some(in_stock);
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        let term = term.into();
        self.search = (!term.trim().is_empty()).then(|| term.trim().to_string());
        self
    }

    pub fn discounted_only(mut self) -> Self {
        self.discounted_only = true;
        self
    }

    pub fn include_inactive(mut self) -> Self {
        self.include_inactive = true;
        self
    }

    pub fn ordering(mut self, ordering: ProductOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `product` passes every filter of this query.
    pub fn matches(&self, product: &Product) -> bool {
        if !self.include_inactive && !product.is_active {
            return false;
        }
        if let Some(category_id) = self.category_id
            && product.category_id != category_id
        {
            return false;
        }
        if let Some(tag_id) = self.tag_id
            && !product.tag_ids.contains(&tag_id)
        {
            return false;
        }
        if let Some(in_stock) = self.in_stock
            && product.in_stock != in_stock
        {
            return false;
        }
        if self.discounted_only && product.old_price.is_none() {
            return false;
        }
        if let Some(ref term) = self.search {
            let term = term.to_lowercase();
            let hit = [
                &product.name,
                &product.description,
                &product.short_description,
            ]
            .iter()
            .any(|field| field.to_lowercase().contains(&term));
            if !hit {
                return false;
            }
        }
        true
    }
}
