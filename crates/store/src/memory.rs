use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    Account, Cart, CartId, CartIdentity, CartItem, CartItemId, CartLine, Category, CategoryId,
    NewOrder, Order, OrderId, OrderStatus, Product, ProductId, Tag, TagId, UserId,
};
use tokio::sync::RwLock;

use crate::{
    ProductQuery, Result, StoreError,
    repository::{
        AccountRepository, CartRepository, CategoryRepository, OrderRepository,
        ProductRepository, TagRepository,
    },
};

#[derive(Debug, Clone, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    categories: HashMap<CategoryId, Category>,
    tags: HashMap<TagId, Tag>,
    carts: HashMap<CartId, Cart>,
    cart_owners: HashMap<CartIdentity, CartId>,
    cart_items: HashMap<CartItemId, CartItem>,
    orders: HashMap<OrderId, Order>,
    accounts: HashMap<UserId, Account>,
}

impl Tables {
    fn check_product_refs(&self, product: &Product) -> Result<()> {
        if !self.categories.contains_key(&product.category_id) {
            return Err(StoreError::MissingReference(format!(
                "category {}",
                product.category_id
            )));
        }
        if let Some(tag_id) = product
            .tag_ids
            .iter()
            .find(|id| !self.tags.contains_key(id))
        {
            return Err(StoreError::MissingReference(format!("tag {tag_id}")));
        }
        Ok(())
    }

    fn cart_lines(&self, cart_id: CartId) -> Result<Vec<CartLine>> {
        let mut lines = self
            .cart_items
            .values()
            .filter(|item| item.cart_id == cart_id)
            .map(|item| -> Result<CartLine> {
                let product = self.products.get(&item.product_id).ok_or_else(|| {
                    StoreError::Corrupt(format!(
                        "cart item {} refers to missing product {}",
                        item.id, item.product_id
                    ))
                })?;
                Ok(CartLine {
                    item: item.clone(),
                    product: product.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        lines.sort_by(|a, b| {
            a.item
                .added_at
                .cmp(&b.item.added_at)
                .then_with(|| a.item.id.cmp(&b.item.id))
        });
        Ok(lines)
    }

    /// Rejects `account` if another user holds its username or email.
    fn check_account_unique(&self, account: &Account) -> Result<()> {
        for other in self.accounts.values() {
            if other.user_id == account.user_id {
                continue;
            }
            if other.username == account.username {
                return Err(StoreError::Duplicate {
                    entity: "username",
                    key: account.username.clone(),
                });
            }
            if let Some(email) = &account.email
                && other.email.as_ref() == Some(email)
            {
                return Err(StoreError::Duplicate {
                    entity: "email",
                    key: email.clone(),
                });
            }
        }
        Ok(())
    }

    fn touch_cart(&mut self, cart_id: CartId) {
        if let Some(cart) = self.carts.get_mut(&cart_id) {
            cart.updated_at = Utc::now();
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    /// Fail `place_order` after this many order items have been written.
    fail_order_items_after: Option<usize>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: Tables,
    faults: Faults,
}

/// In-memory store implementation.
///
/// Used by tests and by the server when no database is configured. Every
/// operation runs under a single write lock; multi-row writes are staged on a
/// copy of the tables and swapped in only when they fully succeed.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `place_order` calls fail after writing `written`
    /// order items. `None` disables the fault.
    pub async fn fail_order_items_after(&self, written: Option<usize>) {
        self.inner.write().await.faults.fail_order_items_after = written;
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.inner.read().await.tables.orders.len()
    }

    /// Returns the number of carts.
    pub async fn cart_count(&self) -> usize {
        self.inner.read().await.tables.carts.len()
    }
}

#[async_trait]
impl ProductRepository for InMemoryStore {
    async fn product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.inner.read().await.tables.products.get(&id).cloned())
    }

    async fn product_by_slug(&self, slug: &str) -> Result<Option<Product>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tables
            .products
            .values()
            .find(|p| p.slug == slug)
            .cloned())
    }

    async fn list_products(&self, query: &ProductQuery) -> Result<Vec<Product>> {
        let inner = self.inner.read().await;
        let mut products: Vec<_> = inner
            .tables
            .products
            .values()
            .filter(|p| query.matches(p))
            .cloned()
            .collect();
        products.sort_by(|a, b| query.ordering.compare(a, b));
        if let Some(limit) = query.limit {
            products.truncate(limit);
        }
        Ok(products)
    }

    async fn insert_product(&self, product: &Product) -> Result<()> {
        let mut inner = self.inner.write().await;
        let tables = &mut inner.tables;
        if tables.products.values().any(|p| p.slug == product.slug) {
            return Err(StoreError::Duplicate {
                entity: "product",
                key: product.slug.clone(),
            });
        }
        tables.check_product_refs(product)?;
        tables.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let tables = &mut inner.tables;
        if !tables.products.contains_key(&product.id) {
            return Ok(false);
        }
        if tables
            .products
            .values()
            .any(|p| p.slug == product.slug && p.id != product.id)
        {
            return Err(StoreError::Duplicate {
                entity: "product",
                key: product.slug.clone(),
            });
        }
        tables.check_product_refs(product)?;
        tables.products.insert(product.id, product.clone());
        Ok(true)
    }

    async fn delete_product(&self, id: ProductId) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let tables = &mut inner.tables;
        if !tables.products.contains_key(&id) {
            return Ok(false);
        }
        let ordered = tables
            .orders
            .values()
            .any(|o| o.items.iter().any(|i| i.product_id == id));
        if ordered {
            return Err(StoreError::InUse {
                entity: "product",
                id: id.to_string(),
            });
        }
        tables.products.remove(&id);
        tables.cart_items.retain(|_, item| item.product_id != id);
        Ok(true)
    }

    async fn record_view(&self, id: ProductId) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(product) = inner.tables.products.get_mut(&id) {
            product.views_count += 1;
        }
        Ok(())
    }

    async fn record_orders(&self, id: ProductId, quantity: u32) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(product) = inner.tables.products.get_mut(&id) {
            product.orders_count += u64::from(quantity);
        }
        Ok(())
    }
}

#[async_trait]
impl CategoryRepository for InMemoryStore {
    async fn categories(&self, include_inactive: bool) -> Result<Vec<Category>> {
        let inner = self.inner.read().await;
        let mut categories: Vec<_> = inner
            .tables
            .categories
            .values()
            .filter(|c| include_inactive || c.is_active)
            .cloned()
            .collect();
        categories.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(categories)
    }

    async fn category(&self, id: CategoryId) -> Result<Option<Category>> {
        Ok(self.inner.read().await.tables.categories.get(&id).cloned())
    }

    async fn category_by_slug(&self, slug: &str) -> Result<Option<Category>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tables
            .categories
            .values()
            .find(|c| c.slug == slug)
            .cloned())
    }

    async fn insert_category(&self, category: &Category) -> Result<()> {
        let mut inner = self.inner.write().await;
        let tables = &mut inner.tables;
        if tables.categories.values().any(|c| c.slug == category.slug) {
            return Err(StoreError::Duplicate {
                entity: "category",
                key: category.slug.clone(),
            });
        }
        if let Some(parent_id) = category.parent_id
            && !tables.categories.contains_key(&parent_id)
        {
            return Err(StoreError::MissingReference(format!(
                "category {parent_id}"
            )));
        }
        tables.categories.insert(category.id, category.clone());
        Ok(())
    }
}

#[async_trait]
impl TagRepository for InMemoryStore {
    async fn tags(&self) -> Result<Vec<Tag>> {
        let inner = self.inner.read().await;
        let mut tags: Vec<_> = inner.tables.tags.values().cloned().collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn tag(&self, id: TagId) -> Result<Option<Tag>> {
        Ok(self.inner.read().await.tables.tags.get(&id).cloned())
    }

    async fn tag_by_slug(&self, slug: &str) -> Result<Option<Tag>> {
        let inner = self.inner.read().await;
        Ok(inner.tables.tags.values().find(|t| t.slug == slug).cloned())
    }

    async fn insert_tag(&self, tag: &Tag) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.tables.tags.values().any(|t| t.slug == tag.slug) {
            return Err(StoreError::Duplicate {
                entity: "tag",
                key: tag.slug.clone(),
            });
        }
        inner.tables.tags.insert(tag.id, tag.clone());
        Ok(())
    }
}

#[async_trait]
impl CartRepository for InMemoryStore {
    async fn find_cart(&self, identity: &CartIdentity) -> Result<Option<Cart>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tables
            .cart_owners
            .get(identity)
            .and_then(|id| inner.tables.carts.get(id))
            .cloned())
    }

    async fn find_or_create_cart(&self, identity: &CartIdentity) -> Result<Cart> {
        let mut inner = self.inner.write().await;
        let tables = &mut inner.tables;
        if let Some(cart) = tables
            .cart_owners
            .get(identity)
            .and_then(|id| tables.carts.get(id))
        {
            return Ok(cart.clone());
        }

        let now = Utc::now();
        let cart = Cart {
            id: CartId::new(),
            owner: identity.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.cart_owners.insert(identity.clone(), cart.id);
        tables.carts.insert(cart.id, cart.clone());
        tracing::debug!(cart_id = %cart.id, owner = %identity, "cart created");
        Ok(cart)
    }

    async fn cart_lines(&self, cart_id: CartId) -> Result<Vec<CartLine>> {
        self.inner.read().await.tables.cart_lines(cart_id)
    }

    async fn add_or_increment_item(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem> {
        let mut inner = self.inner.write().await;
        let tables = &mut inner.tables;
        if !tables.carts.contains_key(&cart_id) {
            return Err(StoreError::MissingReference(format!("cart {cart_id}")));
        }
        if !tables.products.contains_key(&product_id) {
            return Err(StoreError::MissingReference(format!(
                "product {product_id}"
            )));
        }

        let existing = tables
            .cart_items
            .values_mut()
            .find(|item| item.cart_id == cart_id && item.product_id == product_id);

        let item = match existing {
            Some(item) => {
                let current = item.quantity;
                item.quantity =
                    current
                        .checked_add(quantity)
                        .ok_or_else(|| StoreError::OutOfRange {
                            field: "cart_items.quantity",
                            value: format!("{current} + {quantity}"),
                        })?;
                item.clone()
            }
            None => {
                let item = CartItem {
                    id: CartItemId::new(),
                    cart_id,
                    product_id,
                    quantity,
                    added_at: Utc::now(),
                };
                tables.cart_items.insert(item.id, item.clone());
                item
            }
        };
        tables.touch_cart(cart_id);
        Ok(item)
    }

    async fn set_item_quantity(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<Option<CartItem>> {
        let mut inner = self.inner.write().await;
        let tables = &mut inner.tables;
        let updated = match tables.cart_items.get_mut(&item_id) {
            Some(item) if item.cart_id == cart_id => {
                item.quantity = quantity;
                Some(item.clone())
            }
            _ => None,
        };
        if updated.is_some() {
            tables.touch_cart(cart_id);
        }
        Ok(updated)
    }

    async fn remove_item(&self, cart_id: CartId, item_id: CartItemId) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let tables = &mut inner.tables;
        let owned = tables
            .cart_items
            .get(&item_id)
            .is_some_and(|item| item.cart_id == cart_id);
        if owned {
            tables.cart_items.remove(&item_id);
            tables.touch_cart(cart_id);
        }
        Ok(owned)
    }

    async fn clear_cart(&self, cart_id: CartId) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let tables = &mut inner.tables;
        let before = tables.cart_items.len();
        tables.cart_items.retain(|_, item| item.cart_id != cart_id);
        let removed = before - tables.cart_items.len();
        if removed > 0 {
            tables.touch_cart(cart_id);
        }
        Ok(removed as u64)
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn place_order(
        &self,
        owner: UserId,
        cart_id: CartId,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let mut inner = self.inner.write().await;
        let fail_after = inner.faults.fail_order_items_after;

        if !inner.tables.carts.contains_key(&cart_id) {
            return Err(StoreError::MissingReference(format!("cart {cart_id}")));
        }
        let lines = inner.tables.cart_lines(cart_id)?;
        if lines.is_empty() {
            return Ok(None);
        }
        let order = NewOrder::from_lines(owner, &lines, at);

        // Stage every write on a copy; the live tables only change on success.
        let mut staged = inner.tables.clone();

        let mut stored = Order {
            items: Vec::with_capacity(order.items.len()),
            ..order.clone().into_order()
        };
        staged.orders.insert(stored.id, stored.clone());

        for (written, item) in order.items.into_iter().enumerate() {
            if fail_after == Some(written) {
                return Err(StoreError::Unavailable(format!(
                    "injected failure after {written} order items"
                )));
            }
            if !staged.products.contains_key(&item.product_id) {
                return Err(StoreError::MissingReference(format!(
                    "product {}",
                    item.product_id
                )));
            }
            stored.items.push(item);
            staged.orders.insert(stored.id, stored.clone());
        }

        staged.cart_items.retain(|_, item| item.cart_id != cart_id);
        staged.touch_cart(cart_id);

        inner.tables = staged;
        Ok(Some(stored))
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.inner.read().await.tables.orders.get(&id).cloned())
    }

    async fn orders_for_owner(&self, owner: UserId) -> Result<Vec<Order>> {
        let inner = self.inner.read().await;
        let mut orders: Vec<_> = inner
            .tables
            .orders
            .values()
            .filter(|o| o.owner == owner)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let mut inner = self.inner.write().await;
        Ok(inner.tables.orders.get_mut(&id).map(|order| {
            order.status = status;
            order.updated_at = at;
            order.clone()
        }))
    }

    async fn count_orders(&self) -> Result<u64> {
        Ok(self.inner.read().await.tables.orders.len() as u64)
    }
}

#[async_trait]
impl AccountRepository for InMemoryStore {
    async fn account(&self, user_id: UserId) -> Result<Option<Account>> {
        Ok(self.inner.read().await.tables.accounts.get(&user_id).cloned())
    }

    async fn insert_account(&self, account: &Account) -> Result<()> {
        let mut inner = self.inner.write().await;
        let tables = &mut inner.tables;
        if tables.accounts.contains_key(&account.user_id) {
            return Err(StoreError::Duplicate {
                entity: "account",
                key: account.user_id.to_string(),
            });
        }
        tables.check_account_unique(account)?;
        tables.accounts.insert(account.user_id, account.clone());
        Ok(())
    }

    async fn update_account(&self, account: &Account) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let tables = &mut inner.tables;
        if !tables.accounts.contains_key(&account.user_id) {
            return Ok(false);
        }
        tables.check_account_unique(account)?;
        tables.accounts.insert(account.user_id, account.clone());
        Ok(true)
    }
}
