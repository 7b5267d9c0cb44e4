//! Catalog browsing and administration.

use chrono::Utc;
use common::{
    Category, CategoryId, Money, Principal, Product, ProductId, Tag, TagId, slugify,
};
use serde::Serialize;
use store::{ProductOrdering, ProductQuery, ShopStore, SortField, StoreError};
use thiserror::Error;

use crate::access::AccessPolicy;
use crate::error::DomainError;

/// Number of products in the popular and newest showcases.
pub const SHOWCASE_SIZE: usize = 8;

/// Errors raised by catalog operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("category not found: {0}")]
    CategoryNotFound(String),

    #[error("product not found: {0}")]
    ProductNotFound(String),

    #[error("unknown ordering: {0}")]
    InvalidOrdering(String),

    /// Rejected input; the message names the offending field.
    #[error("{0}")]
    Validation(String),

    #[error("slug already taken: {0}")]
    SlugTaken(String),

    /// The product appears in placed orders and cannot be deleted.
    #[error("product is referenced by orders: {0}")]
    ProductInUse(ProductId),
}

/// Listing filter; category and tag are given by slug.
#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub tag: Option<String>,
    pub in_stock: Option<bool>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

/// Input for creating or replacing a product.
#[derive(Debug, Clone)]
pub struct ProductDraft {
    pub name: String,
    /// Derived from the name when blank.
    pub slug: Option<String>,
    pub description: String,
    pub short_description: String,
    pub price: Money,
    pub old_price: Option<Money>,
    pub category_id: CategoryId,
    pub tag_ids: Vec<TagId>,
    pub weight_grams: u32,
    pub quantity_on_hand: u32,
    pub in_stock: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CategoryDraft {
    pub name: String,
    pub slug: Option<String>,
    pub description: String,
    pub parent_id: Option<CategoryId>,
    pub sort_order: u32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TagDraft {
    pub name: String,
    pub slug: Option<String>,
    pub color: Option<String>,
}

/// Admin overview counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dashboard {
    pub products: u64,
    pub active_products: u64,
    pub categories: u64,
    pub orders: u64,
}

fn parse_ordering(raw: Option<&str>) -> Result<ProductOrdering, CatalogError> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(ProductOrdering::default()),
        Some(raw) => {
            ProductOrdering::parse(raw).ok_or_else(|| CatalogError::InvalidOrdering(raw.to_string()))
        }
    }
}

/// Normalizes an explicit slug, or derives one from the name.
fn slug_for(name: &str, explicit: Option<&str>) -> Result<String, CatalogError> {
    let slug = match explicit.map(str::trim).filter(|s| !s.is_empty()) {
        Some(explicit) => slugify(explicit),
        None => slugify(name),
    };
    if slug.is_empty() {
        return Err(CatalogError::Validation(
            "slug must contain at least one letter or digit".to_string(),
        ));
    }
    Ok(slug)
}

fn required_name(name: &str) -> Result<String, CatalogError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CatalogError::Validation("name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

/// Maps a store write failure to the catalog error the caller can act on.
fn write_error(err: StoreError, slug: &str) -> DomainError {
    match err {
        StoreError::Duplicate { .. } => CatalogError::SlugTaken(slug.to_string()).into(),
        StoreError::MissingReference(what) => {
            CatalogError::Validation(format!("unknown reference: {what}")).into()
        }
        other => other.into(),
    }
}

/// Catalog reads for everyone, writes for admins.
pub struct CatalogService<S: ShopStore> {
    store: S,
}

impl<S: ShopStore> CatalogService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Lists active categories.
    pub async fn list_categories(&self) -> Result<Vec<Category>, DomainError> {
        Ok(self.store.categories(false).await?)
    }

    /// Loads an active category by slug.
    pub async fn category(&self, slug: &str) -> Result<Category, DomainError> {
        match self.store.category_by_slug(slug).await? {
            Some(category) if category.is_active => Ok(category),
            _ => Err(CatalogError::CategoryNotFound(slug.to_string()).into()),
        }
    }

    /// Lists the active products of a category, optionally narrowed to a tag.
    #[tracing::instrument(skip(self))]
    pub async fn category_products(
        &self,
        slug: &str,
        tag: Option<&str>,
        ordering: Option<&str>,
    ) -> Result<Vec<Product>, DomainError> {
        let category = self.category(slug).await?;
        let ordering = parse_ordering(ordering)?;

        let mut query = ProductQuery::new().category(category.id).ordering(ordering);
        if let Some(tag) = tag.filter(|t| !t.is_empty()) {
            match self.store.tag_by_slug(tag).await? {
                Some(tag) => query = query.tag(tag.id),
                None => return Ok(vec![]),
            }
        }

        Ok(self.store.list_products(&query).await?)
    }

    /// Lists active products matching `filter`.
    ///
    /// An unknown category or tag slug matches nothing.
    #[tracing::instrument(skip(self))]
    pub async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<Product>, DomainError> {
        let mut query = ProductQuery::new().ordering(parse_ordering(filter.ordering.as_deref())?);

        if let Some(ref slug) = filter.category {
            match self.store.category_by_slug(slug).await? {
                Some(category) => query = query.category(category.id),
                None => return Ok(vec![]),
            }
        }
        if let Some(ref slug) = filter.tag {
            match self.store.tag_by_slug(slug).await? {
                Some(tag) => query = query.tag(tag.id),
                None => return Ok(vec![]),
            }
        }
        if let Some(in_stock) = filter.in_stock {
            query = query.in_stock(in_stock);
        }
        if let Some(ref term) = filter.search {
            query = query.search(term.as_str());
        }

        Ok(self.store.list_products(&query).await?)
    }

    /// Loads an active product by slug and counts the view.
    #[tracing::instrument(skip(self))]
    pub async fn product_detail(&self, slug: &str) -> Result<Product, DomainError> {
        let mut product = match self.store.product_by_slug(slug).await? {
            Some(product) if product.is_active => product,
            _ => return Err(CatalogError::ProductNotFound(slug.to_string()).into()),
        };

        self.store.record_view(product.id).await?;
        product.views_count += 1;
        metrics::counter!("product_views_total").increment(1);

        Ok(product)
    }

    /// Most viewed products.
    pub async fn popular(&self) -> Result<Vec<Product>, DomainError> {
        let query = ProductQuery::new()
            .ordering(ProductOrdering::descending(SortField::ViewsCount))
            .limit(SHOWCASE_SIZE);
        Ok(self.store.list_products(&query).await?)
    }

    /// Most recently created products.
    pub async fn newest(&self) -> Result<Vec<Product>, DomainError> {
        let query = ProductQuery::new()
            .ordering(ProductOrdering::descending(SortField::CreatedAt))
            .limit(SHOWCASE_SIZE);
        Ok(self.store.list_products(&query).await?)
    }

    /// Products with an old price recorded.
    pub async fn discounted(&self) -> Result<Vec<Product>, DomainError> {
        let query = ProductQuery::new().discounted_only();
        Ok(self.store.list_products(&query).await?)
    }

    /// Checks a draft and resolves its slug.
    async fn validate_product(&self, draft: &ProductDraft) -> Result<(String, String), DomainError> {
        let name = required_name(&draft.name)?;
        if draft.price.is_negative() {
            return Err(CatalogError::Validation("price must not be negative".to_string()).into());
        }
        if draft.old_price.is_some_and(|p| p.is_negative()) {
            return Err(
                CatalogError::Validation("old price must not be negative".to_string()).into(),
            );
        }
        if draft.price > Money::MAX_UNIT_PRICE
            || draft.old_price.is_some_and(|p| p > Money::MAX_UNIT_PRICE)
        {
            return Err(CatalogError::Validation(format!(
                "price must not exceed {}",
                Money::MAX_UNIT_PRICE
            ))
            .into());
        }
        if self.store.category(draft.category_id).await?.is_none() {
            return Err(CatalogError::Validation(format!(
                "unknown category: {}",
                draft.category_id
            ))
            .into());
        }
        for tag_id in &draft.tag_ids {
            if self.store.tag(*tag_id).await?.is_none() {
                return Err(CatalogError::Validation(format!("unknown tag: {tag_id}")).into());
            }
        }

        let slug = slug_for(&name, draft.slug.as_deref())?;
        Ok((name, slug))
    }

    #[tracing::instrument(skip(self, draft), fields(name = %draft.name))]
    pub async fn create_product(
        &self,
        principal: Option<&Principal>,
        draft: ProductDraft,
    ) -> Result<Product, DomainError> {
        AccessPolicy::require_admin(principal)?;
        let (name, slug) = self.validate_product(&draft).await?;
        if self.store.product_by_slug(&slug).await?.is_some() {
            return Err(CatalogError::SlugTaken(slug).into());
        }

        let now = Utc::now();
        let mut tag_ids = draft.tag_ids;
        tag_ids.sort();
        tag_ids.dedup();
        let product = Product {
            id: ProductId::new(),
            name,
            slug,
            description: draft.description,
            short_description: draft.short_description,
            price: draft.price,
            old_price: draft.old_price,
            category_id: draft.category_id,
            tag_ids,
            weight_grams: draft.weight_grams,
            quantity_on_hand: draft.quantity_on_hand,
            in_stock: draft.in_stock,
            is_active: draft.is_active,
            views_count: 0,
            orders_count: 0,
            created_at: now,
            updated_at: now,
        };

        self.store
            .insert_product(&product)
            .await
            .map_err(|e| write_error(e, &product.slug))?;

        tracing::info!(product_id = %product.id, slug = %product.slug, "Product created");
        Ok(product)
    }

    /// Replaces a product's editable fields; counters and creation time are kept.
    #[tracing::instrument(skip(self, draft), fields(name = %draft.name))]
    pub async fn update_product(
        &self,
        principal: Option<&Principal>,
        id: ProductId,
        draft: ProductDraft,
    ) -> Result<Product, DomainError> {
        AccessPolicy::require_admin(principal)?;
        let existing = self
            .store
            .product(id)
            .await?
            .ok_or_else(|| CatalogError::ProductNotFound(id.to_string()))?;
        let (name, slug) = self.validate_product(&draft).await?;
        if let Some(other) = self.store.product_by_slug(&slug).await?
            && other.id != id
        {
            return Err(CatalogError::SlugTaken(slug).into());
        }

        let mut tag_ids = draft.tag_ids;
        tag_ids.sort();
        tag_ids.dedup();
        let product = Product {
            name,
            slug,
            description: draft.description,
            short_description: draft.short_description,
            price: draft.price,
            old_price: draft.old_price,
            category_id: draft.category_id,
            tag_ids,
            weight_grams: draft.weight_grams,
            quantity_on_hand: draft.quantity_on_hand,
            in_stock: draft.in_stock,
            is_active: draft.is_active,
            updated_at: Utc::now(),
            ..existing
        };

        let updated = self
            .store
            .update_product(&product)
            .await
            .map_err(|e| write_error(e, &product.slug))?;
        if !updated {
            return Err(CatalogError::ProductNotFound(id.to_string()).into());
        }

        Ok(product)
    }

    /// Deletes a product and the cart lines holding it.
    #[tracing::instrument(skip(self))]
    pub async fn delete_product(
        &self,
        principal: Option<&Principal>,
        id: ProductId,
    ) -> Result<(), DomainError> {
        AccessPolicy::require_admin(principal)?;
        match self.store.delete_product(id).await {
            Ok(true) => {
                tracing::info!(product_id = %id, "Product deleted");
                Ok(())
            }
            Ok(false) => Err(CatalogError::ProductNotFound(id.to_string()).into()),
            Err(StoreError::InUse { .. }) => Err(CatalogError::ProductInUse(id).into()),
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(skip(self, draft), fields(name = %draft.name))]
    pub async fn create_category(
        &self,
        principal: Option<&Principal>,
        draft: CategoryDraft,
    ) -> Result<Category, DomainError> {
        AccessPolicy::require_admin(principal)?;
        let name = required_name(&draft.name)?;
        let slug = slug_for(&name, draft.slug.as_deref())?;
        if let Some(parent_id) = draft.parent_id
            && self.store.category(parent_id).await?.is_none()
        {
            return Err(CatalogError::Validation(format!("unknown parent category: {parent_id}")).into());
        }
        if self.store.category_by_slug(&slug).await?.is_some() {
            return Err(CatalogError::SlugTaken(slug).into());
        }

        let category = Category {
            id: CategoryId::new(),
            name,
            slug,
            description: draft.description,
            parent_id: draft.parent_id,
            sort_order: draft.sort_order,
            is_active: draft.is_active,
            created_at: Utc::now(),
        };
        self.store
            .insert_category(&category)
            .await
            .map_err(|e| write_error(e, &category.slug))?;

        Ok(category)
    }

    #[tracing::instrument(skip(self, draft), fields(name = %draft.name))]
    pub async fn create_tag(
        &self,
        principal: Option<&Principal>,
        draft: TagDraft,
    ) -> Result<Tag, DomainError> {
        AccessPolicy::require_admin(principal)?;
        let name = required_name(&draft.name)?;
        let slug = slug_for(&name, draft.slug.as_deref())?;
        if self.store.tag_by_slug(&slug).await?.is_some() {
            return Err(CatalogError::SlugTaken(slug).into());
        }

        let tag = Tag {
            id: TagId::new(),
            name,
            slug,
            color: draft
                .color
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| Tag::DEFAULT_COLOR.to_string()),
        };
        self.store
            .insert_tag(&tag)
            .await
            .map_err(|e| write_error(e, &tag.slug))?;

        Ok(tag)
    }

    /// Counters for the admin overview.
    pub async fn dashboard(&self, principal: Option<&Principal>) -> Result<Dashboard, DomainError> {
        AccessPolicy::require_admin(principal)?;
        let products = self
            .store
            .list_products(&ProductQuery::new().include_inactive())
            .await?;
        let active_products = products.iter().filter(|p| p.is_active).count();

        Ok(Dashboard {
            products: products.len() as u64,
            active_products: active_products as u64,
            categories: self.store.categories(true).await?.len() as u64,
            orders: self.store.count_orders().await?,
        })
    }
}
