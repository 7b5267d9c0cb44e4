use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    Account, Cart, CartId, CartIdentity, CartItem, CartItemId, CartLine, Category, CategoryId,
    Order, OrderId, OrderStatus, Product, ProductId, Tag, TagId, UserId,
};

use crate::{ProductQuery, Result};

/// Products of the catalog.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Loads a product by id, active or not.
    async fn product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Loads a product by its unique slug, active or not.
    async fn product_by_slug(&self, slug: &str) -> Result<Option<Product>>;

    /// Lists products matching `query`, in the query's ordering.
    async fn list_products(&self, query: &ProductQuery) -> Result<Vec<Product>>;

    /// Inserts a new product.
    ///
    /// Fails with `Duplicate` if the slug is taken and `MissingReference` if
    /// the category or a tag does not exist.
    async fn insert_product(&self, product: &Product) -> Result<()>;

    /// Replaces a stored product. Returns false if it does not exist.
    async fn update_product(&self, product: &Product) -> Result<bool>;

    /// Deletes a product and every cart line referring to it.
    ///
    /// Fails with `InUse` if any order refers to the product. Returns false
    /// if it does not exist.
    async fn delete_product(&self, id: ProductId) -> Result<bool>;

    /// Bumps the view counter by one.
    async fn record_view(&self, id: ProductId) -> Result<()>;

    /// Adds `quantity` to the ordered-units counter.
    async fn record_orders(&self, id: ProductId, quantity: u32) -> Result<()>;
}

/// Product categories.
#[async_trait]
pub trait CategoryRepository: Send + Sync {
    /// Lists categories ordered by `(sort_order, name)`.
    async fn categories(&self, include_inactive: bool) -> Result<Vec<Category>>;

    async fn category(&self, id: CategoryId) -> Result<Option<Category>>;

    async fn category_by_slug(&self, slug: &str) -> Result<Option<Category>>;

    /// Inserts a category; fails with `Duplicate` if the slug is taken.
    async fn insert_category(&self, category: &Category) -> Result<()>;
}

/// Product tags.
#[async_trait]
pub trait TagRepository: Send + Sync {
    /// Lists all tags ordered by name.
    async fn tags(&self) -> Result<Vec<Tag>>;

    async fn tag(&self, id: TagId) -> Result<Option<Tag>>;

    async fn tag_by_slug(&self, slug: &str) -> Result<Option<Tag>>;

    /// Inserts a tag; fails with `Duplicate` if the slug is taken.
    async fn insert_tag(&self, tag: &Tag) -> Result<()>;
}

/// Carts and their line items.
#[async_trait]
pub trait CartRepository: Send + Sync {
    /// Finds the cart owned by `identity` without creating one.
    async fn find_cart(&self, identity: &CartIdentity) -> Result<Option<Cart>>;

    /// Returns the cart owned by `identity`, creating it if needed.
    ///
    /// Concurrent calls for the same identity yield the same cart.
    async fn find_or_create_cart(&self, identity: &CartIdentity) -> Result<Cart>;

    /// Returns the cart's items joined with their live products, oldest first.
    async fn cart_lines(&self, cart_id: CartId) -> Result<Vec<CartLine>>;

    /// Adds `quantity` units of a product to the cart.
    ///
    /// Atomically increments the existing line for the product, or inserts a
    /// new one. A cart never holds two lines for the same product.
    async fn add_or_increment_item(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem>;

    /// Sets the quantity of a line. Returns `None` if the line is not in the cart.
    async fn set_item_quantity(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<Option<CartItem>>;

    /// Removes a line. Returns false if the line is not in the cart.
    async fn remove_item(&self, cart_id: CartId, item_id: CartItemId) -> Result<bool>;

    /// Removes every line of the cart, returning how many were removed.
    async fn clear_cart(&self, cart_id: CartId) -> Result<u64>;
}

/// Placed orders.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Converts the cart's current lines into a pending order for `owner`
    /// and empties the cart, as one atomic unit.
    ///
    /// The lines are read under the same lock or transaction that deletes
    /// them, so the order holds exactly the lines removed from the cart.
    /// Returns `None` without writing anything when the cart has no lines.
    /// On any failure nothing is written: no order is visible and the cart
    /// keeps its lines.
    async fn place_order(
        &self,
        owner: UserId,
        cart_id: CartId,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>>;

    async fn order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists the owner's orders, newest first.
    async fn orders_for_owner(&self, owner: UserId) -> Result<Vec<Order>>;

    /// Sets the status of an order. Returns `None` if it does not exist.
    async fn update_order_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>>;

    async fn count_orders(&self) -> Result<u64>;
}

/// User profiles.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn account(&self, user_id: UserId) -> Result<Option<Account>>;

    /// Inserts an account.
    ///
    /// Fails with `Duplicate` if the user id, username or email is taken.
    async fn insert_account(&self, account: &Account) -> Result<()>;

    /// Replaces a stored account. Returns false if it does not exist.
    ///
    /// Fails with `Duplicate` if the new username or email belongs to
    /// another account.
    async fn update_account(&self, account: &Account) -> Result<bool>;
}

/// A complete storage backend.
pub trait ShopStore:
    ProductRepository
    + CategoryRepository
    + TagRepository
    + CartRepository
    + OrderRepository
    + AccountRepository
    + Clone
    + 'static
{
}

impl<T> ShopStore for T where
    T: ProductRepository
        + CategoryRepository
        + TagRepository
        + CartRepository
        + OrderRepository
        + AccountRepository
        + Clone
        + 'static
{
}
