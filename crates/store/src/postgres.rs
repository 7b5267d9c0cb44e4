use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    Account, Cart, CartId, CartIdentity, CartItem, CartItemId, CartLine, Category, CategoryId,
    Money, NewOrder, Order, OrderId, OrderItem, OrderStatus, Product, ProductId, SessionToken, Tag,
    TagId, UserId,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::{
    ProductQuery, Result, StoreError,
    repository::{
        AccountRepository, CartRepository, CategoryRepository, OrderRepository,
        ProductRepository, TagRepository,
    },
};

const PRODUCT_COLUMNS: &str = r#"
    p.id, p.name, p.slug, p.description, p.short_description, p.price_cents,
    p.old_price_cents, p.category_id, p.weight_grams, p.quantity_on_hand, p.in_stock,
    p.is_active, p.views_count, p.orders_count, p.created_at, p.updated_at,
    ARRAY(SELECT pt.tag_id FROM product_tags pt WHERE pt.product_id = p.id ORDER BY pt.tag_id) AS tag_ids
"#;

const CATEGORY_COLUMNS: &str =
    "id, name, slug, description, parent_id, sort_order, is_active, created_at";

const CART_COLUMNS: &str = "id, user_id, session_key, created_at, updated_at";

const ACCOUNT_COLUMNS: &str =
    "user_id, username, email, first_name, last_name, phone, role, created_at, updated_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Takes a row lock on the cart for the rest of the transaction.
    async fn lock_cart(tx: &mut Transaction<'_, Postgres>, cart_id: CartId) -> Result<()> {
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM carts WHERE id = $1 FOR UPDATE")
                .bind(cart_id.as_uuid())
                .fetch_optional(&mut **tx)
                .await?;
        locked
            .map(|_| ())
            .ok_or_else(|| StoreError::MissingReference(format!("cart {cart_id}")))
    }

    async fn touch_cart(
        tx: &mut Transaction<'_, Postgres>,
        cart_id: CartId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE carts SET updated_at = $2 WHERE id = $1")
            .bind(cart_id.as_uuid())
            .bind(at)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Reads the cart's lines joined with their products on `conn`, which may
    /// be a transaction holding the cart lock.
    async fn fetch_cart_lines(conn: &mut PgConnection, cart_id: CartId) -> Result<Vec<CartLine>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT ci.id AS item_id, ci.quantity AS item_quantity, ci.added_at AS item_added_at,
                   {PRODUCT_COLUMNS}
            FROM cart_items ci
            JOIN products p ON p.id = ci.product_id
            WHERE ci.cart_id = $1
            ORDER BY ci.added_at ASC, ci.id ASC
            "#
        ))
        .bind(cart_id.as_uuid())
        .fetch_all(&mut *conn)
        .await?;

        rows.iter()
            .map(|row| -> Result<CartLine> {
                let product = row_to_product(row)?;
                let item = CartItem {
                    id: CartItemId::from_uuid(row.try_get("item_id")?),
                    cart_id,
                    product_id: product.id,
                    quantity: to_u32(row.try_get("item_quantity")?, "cart_items.quantity")?,
                    added_at: row.try_get("item_added_at")?,
                };
                Ok(CartLine { item, product })
            })
            .collect()
    }

    async fn replace_product_tags(
        tx: &mut Transaction<'_, Postgres>,
        product: &Product,
    ) -> Result<()> {
        sqlx::query("DELETE FROM product_tags WHERE product_id = $1")
            .bind(product.id.as_uuid())
            .execute(&mut **tx)
            .await?;

        for tag_id in &product.tag_ids {
            sqlx::query("INSERT INTO product_tags (product_id, tag_id) VALUES ($1, $2)")
                .bind(product.id.as_uuid())
                .bind(tag_id.as_uuid())
                .execute(&mut **tx)
                .await
                .map_err(|e| write_error(e, "product tag", tag_id.to_string()))?;
        }
        Ok(())
    }

    /// Loads the items of the given order rows and assembles orders, keeping
    /// the row order.
    async fn assemble_orders(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let item_rows = sqlx::query(
            r#"
            SELECT order_id, product_id, product_name, quantity, unit_price_cents
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY id ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in item_rows {
            let order_id: Uuid = row.try_get("order_id")?;
            items.entry(order_id).or_default().push(OrderItem {
                product_id: ProductId::from_uuid(row.try_get("product_id")?),
                product_name: row.try_get("product_name")?,
                quantity: to_u32(row.try_get("quantity")?, "order_items.quantity")?,
                unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            });
        }

        rows.into_iter()
            .map(|row| -> Result<Order> {
                let id: Uuid = row.try_get("id")?;
                let status: String = row.try_get("status")?;
                Ok(Order {
                    id: OrderId::from_uuid(id),
                    owner: UserId::from_uuid(row.try_get("user_id")?),
                    status: status.parse().map_err(StoreError::Corrupt)?,
                    items: items.remove(&id).unwrap_or_default(),
                    created_at: row.try_get("created_at")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }
}

fn write_error(err: sqlx::Error, entity: &'static str, key: String) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return StoreError::Duplicate { entity, key };
        }
        if db_err.is_foreign_key_violation() {
            let constraint = db_err.constraint().unwrap_or("foreign key");
            return StoreError::MissingReference(format!("{entity} {key} ({constraint})"));
        }
    }
    StoreError::Database(err)
}

/// Names the account field behind a unique violation.
fn account_write_error(err: sqlx::Error, account: &Account) -> StoreError {
    let constraint = match &err {
        sqlx::Error::Database(db_err) => db_err.constraint().map(str::to_owned),
        _ => None,
    };
    match constraint.as_deref() {
        Some("unique_account_username") => write_error(err, "username", account.username.clone()),
        Some("unique_account_email") => write_error(
            err,
            "email",
            account.email.clone().unwrap_or_default(),
        ),
        _ => write_error(err, "account", account.user_id.to_string()),
    }
}

fn to_u32(value: i32, field: &'static str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{field} is negative: {value}")))
}

fn to_u64(value: i64, field: &'static str) -> Result<u64> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("{field} is negative: {value}")))
}

fn to_i32(value: u32, field: &'static str) -> Result<i32> {
    i32::try_from(value).map_err(|_| StoreError::OutOfRange {
        field,
        value: value.to_string(),
    })
}

fn owner_columns(identity: &CartIdentity) -> (Option<Uuid>, Option<&str>) {
    match identity {
        CartIdentity::User(user_id) => (Some(user_id.as_uuid()), None),
        CartIdentity::Session(token) => (None, Some(token.as_str())),
    }
}

fn row_to_product(row: &PgRow) -> Result<Product> {
    let tag_ids: Vec<Uuid> = row.try_get("tag_ids")?;
    Ok(Product {
        id: ProductId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        description: row.try_get("description")?,
        short_description: row.try_get("short_description")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        old_price: row
            .try_get::<Option<i64>, _>("old_price_cents")?
            .map(Money::from_cents),
        category_id: CategoryId::from_uuid(row.try_get("category_id")?),
        tag_ids: tag_ids.into_iter().map(TagId::from_uuid).collect(),
        weight_grams: to_u32(row.try_get("weight_grams")?, "products.weight_grams")?,
        quantity_on_hand: to_u32(row.try_get("quantity_on_hand")?, "products.quantity_on_hand")?,
        in_stock: row.try_get("in_stock")?,
        is_active: row.try_get("is_active")?,
        views_count: to_u64(row.try_get("views_count")?, "products.views_count")?,
        orders_count: to_u64(row.try_get("orders_count")?, "products.orders_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_category(row: &PgRow) -> Result<Category> {
    Ok(Category {
        id: CategoryId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        description: row.try_get("description")?,
        parent_id: row
            .try_get::<Option<Uuid>, _>("parent_id")?
            .map(CategoryId::from_uuid),
        sort_order: to_u32(row.try_get("sort_order")?, "categories.sort_order")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_tag(row: &PgRow) -> Result<Tag> {
    Ok(Tag {
        id: TagId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        color: row.try_get("color")?,
    })
}

fn row_to_cart(row: &PgRow) -> Result<Cart> {
    let user_id: Option<Uuid> = row.try_get("user_id")?;
    let session_key: Option<String> = row.try_get("session_key")?;
    let id = CartId::from_uuid(row.try_get("id")?);

    let owner = match (user_id, session_key) {
        (Some(user_id), None) => CartIdentity::User(UserId::from_uuid(user_id)),
        (None, Some(key)) => CartIdentity::Session(
            SessionToken::parse(&key)
                .ok_or_else(|| StoreError::Corrupt(format!("cart {id} has unusable session key")))?,
        ),
        _ => {
            return Err(StoreError::Corrupt(format!(
                "cart {id} must have exactly one owner"
            )));
        }
    };

    Ok(Cart {
        id,
        owner,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_account(row: &PgRow) -> Result<Account> {
    let role: String = row.try_get("role")?;
    Ok(Account {
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        phone: row.try_get("phone")?,
        role: role.parse().map_err(StoreError::Corrupt)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_cart_item(row: &PgRow) -> Result<CartItem> {
    Ok(CartItem {
        id: CartItemId::from_uuid(row.try_get("id")?),
        cart_id: CartId::from_uuid(row.try_get("cart_id")?),
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        quantity: to_u32(row.try_get("quantity")?, "cart_items.quantity")?,
        added_at: row.try_get("added_at")?,
    })
}

/// Escapes `%`, `_` and `\` so user input matches literally inside `ILIKE`.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[async_trait]
impl ProductRepository for PostgresStore {
    async fn product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn product_by_slug(&self, slug: &str) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.slug = $1"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    async fn list_products(&self, query: &ProductQuery) -> Result<Vec<Product>> {
        let mut sql = format!("SELECT {PRODUCT_COLUMNS} FROM products p WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if !query.include_inactive {
            sql.push_str(" AND p.is_active = TRUE");
        }
        if query.category_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND p.category_id = ${param_count}"));
        }
        if query.tag_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM product_tags t WHERE t.product_id = p.id AND t.tag_id = ${param_count})"
            ));
        }
        if query.in_stock.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND p.in_stock = ${param_count}"));
        }
        if query.search.is_some() {
            param_count += 1;
            sql.push_str(&format!(
                " AND (p.name ILIKE ${param_count} OR p.description ILIKE ${param_count} OR p.short_description ILIKE ${param_count})"
            ));
        }
        if query.discounted_only {
            sql.push_str(" AND p.old_price_cents IS NOT NULL");
        }

        let direction = if query.ordering.descending {
            "DESC"
        } else {
            "ASC"
        };
        sql.push_str(&format!(
            " ORDER BY p.{} {direction}, p.id ASC",
            query.ordering.field.column()
        ));

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        // Build and execute query with parameters
        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.category_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(id) = query.tag_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(in_stock) = query.in_stock {
            sqlx_query = sqlx_query.bind(in_stock);
        }
        if let Some(ref term) = query.search {
            sqlx_query = sqlx_query.bind(like_pattern(term));
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_product).collect()
    }

    async fn insert_product(&self, product: &Product) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO products (
                id, name, slug, description, short_description, price_cents, old_price_cents,
                category_id, weight_grams, quantity_on_hand, in_stock, is_active,
                views_count, orders_count, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.slug)
        .bind(&product.description)
        .bind(&product.short_description)
        .bind(product.price.cents())
        .bind(product.old_price.map(|m| m.cents()))
        .bind(product.category_id.as_uuid())
        .bind(to_i32(product.weight_grams, "products.weight_grams")?)
        .bind(to_i32(product.quantity_on_hand, "products.quantity_on_hand")?)
        .bind(product.in_stock)
        .bind(product.is_active)
        .bind(i64::try_from(product.views_count).unwrap_or(i64::MAX))
        .bind(i64::try_from(product.orders_count).unwrap_or(i64::MAX))
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, "product", product.slug.clone()))?;

        Self::replace_product_tags(&mut tx, product).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE products SET
                name = $2, slug = $3, description = $4, short_description = $5,
                price_cents = $6, old_price_cents = $7, category_id = $8, weight_grams = $9,
                quantity_on_hand = $10, in_stock = $11, is_active = $12, updated_at = $13
            WHERE id = $1
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.slug)
        .bind(&product.description)
        .bind(&product.short_description)
        .bind(product.price.cents())
        .bind(product.old_price.map(|m| m.cents()))
        .bind(product.category_id.as_uuid())
        .bind(to_i32(product.weight_grams, "products.weight_grams")?)
        .bind(to_i32(product.quantity_on_hand, "products.quantity_on_hand")?)
        .bind(product.in_stock)
        .bind(product.is_active)
        .bind(product.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, "product", product.slug.clone()))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        Self::replace_product_tags(&mut tx, product).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_product(&self, id: ProductId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                    StoreError::InUse {
                        entity: "product",
                        id: id.to_string(),
                    }
                }
                other => StoreError::Database(other),
            })?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_view(&self, id: ProductId) -> Result<()> {
        sqlx::query("UPDATE products SET views_count = views_count + 1 WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_orders(&self, id: ProductId, quantity: u32) -> Result<()> {
        sqlx::query("UPDATE products SET orders_count = orders_count + $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(i64::from(quantity))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CategoryRepository for PostgresStore {
    async fn categories(&self, include_inactive: bool) -> Result<Vec<Category>> {
        let rows = sqlx::query(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE $1 OR is_active ORDER BY sort_order ASC, name ASC"
        ))
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_category).collect()
    }

    async fn category(&self, id: CategoryId) -> Result<Option<Category>> {
        let row = sqlx::query(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_category).transpose()
    }

    async fn category_by_slug(&self, slug: &str) -> Result<Option<Category>> {
        let row = sqlx::query(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE slug = $1"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_category).transpose()
    }

    async fn insert_category(&self, category: &Category) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO categories (id, name, slug, description, parent_id, sort_order, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(category.id.as_uuid())
        .bind(&category.name)
        .bind(&category.slug)
        .bind(&category.description)
        .bind(category.parent_id.map(|id| id.as_uuid()))
        .bind(to_i32(category.sort_order, "categories.sort_order")?)
        .bind(category.is_active)
        .bind(category.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "category", category.slug.clone()))?;

        Ok(())
    }
}

#[async_trait]
impl TagRepository for PostgresStore {
    async fn tags(&self) -> Result<Vec<Tag>> {
        let rows = sqlx::query("SELECT id, name, slug, color FROM tags ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_tag).collect()
    }

    async fn tag(&self, id: TagId) -> Result<Option<Tag>> {
        let row = sqlx::query("SELECT id, name, slug, color FROM tags WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_tag).transpose()
    }

    async fn tag_by_slug(&self, slug: &str) -> Result<Option<Tag>> {
        let row = sqlx::query("SELECT id, name, slug, color FROM tags WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_tag).transpose()
    }

    async fn insert_tag(&self, tag: &Tag) -> Result<()> {
        sqlx::query("INSERT INTO tags (id, name, slug, color) VALUES ($1, $2, $3, $4)")
            .bind(tag.id.as_uuid())
            .bind(&tag.name)
            .bind(&tag.slug)
            .bind(&tag.color)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(e, "tag", tag.slug.clone()))?;

        Ok(())
    }
}

#[async_trait]
impl CartRepository for PostgresStore {
    async fn find_cart(&self, identity: &CartIdentity) -> Result<Option<Cart>> {
        let row = match identity {
            CartIdentity::User(user_id) => {
                sqlx::query(&format!("SELECT {CART_COLUMNS} FROM carts WHERE user_id = $1"))
                    .bind(user_id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?
            }
            CartIdentity::Session(token) => {
                sqlx::query(&format!(
                    "SELECT {CART_COLUMNS} FROM carts WHERE session_key = $1"
                ))
                .bind(token.as_str())
                .fetch_optional(&self.pool)
                .await?
            }
        };

        row.as_ref().map(row_to_cart).transpose()
    }

    async fn find_or_create_cart(&self, identity: &CartIdentity) -> Result<Cart> {
        let (user_id, session_key) = owner_columns(identity);

        // A lost creation race hits the unique owner constraints and inserts
        // nothing; the select below returns the winner's cart.
        sqlx::query(
            r#"
            INSERT INTO carts (id, user_id, session_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(session_key)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.find_cart(identity)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("cart for {identity} missing after insert")))
    }

    async fn cart_lines(&self, cart_id: CartId) -> Result<Vec<CartLine>> {
        let mut conn = self.pool.acquire().await?;
        Self::fetch_cart_lines(&mut *conn, cart_id).await
    }

    async fn add_or_increment_item(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        Self::lock_cart(&mut tx, cart_id).await?;

        let row = sqlx::query(
            r#"
            INSERT INTO cart_items (id, cart_id, product_id, quantity, added_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT ON CONSTRAINT unique_cart_product
            DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
            RETURNING id, cart_id, product_id, quantity, added_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(cart_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(to_i32(quantity, "cart_items.quantity")?)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| write_error(e, "cart item", product_id.to_string()))?;

        let item = row_to_cart_item(&row)?;
        Self::touch_cart(&mut tx, cart_id, now).await?;

        tx.commit().await?;
        Ok(item)
    }

    async fn set_item_quantity(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<Option<CartItem>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        Self::lock_cart(&mut tx, cart_id).await?;

        let row = sqlx::query(
            r#"
            UPDATE cart_items SET quantity = $3
            WHERE id = $2 AND cart_id = $1
            RETURNING id, cart_id, product_id, quantity, added_at
            "#,
        )
        .bind(cart_id.as_uuid())
        .bind(item_id.as_uuid())
        .bind(to_i32(quantity, "cart_items.quantity")?)
        .fetch_optional(&mut *tx)
        .await?;

        let item = row.as_ref().map(row_to_cart_item).transpose()?;
        if item.is_some() {
            Self::touch_cart(&mut tx, cart_id, now).await?;
        }

        tx.commit().await?;
        Ok(item)
    }

    async fn remove_item(&self, cart_id: CartId, item_id: CartItemId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        Self::lock_cart(&mut tx, cart_id).await?;

        let result = sqlx::query("DELETE FROM cart_items WHERE id = $2 AND cart_id = $1")
            .bind(cart_id.as_uuid())
            .bind(item_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            Self::touch_cart(&mut tx, cart_id, Utc::now()).await?;
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn clear_cart(&self, cart_id: CartId) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        Self::lock_cart(&mut tx, cart_id).await?;

        let result = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() > 0 {
            Self::touch_cart(&mut tx, cart_id, Utc::now()).await?;
        }

        tx.commit().await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OrderRepository for PostgresStore {
    async fn place_order(
        &self,
        owner: UserId,
        cart_id: CartId,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        // Any early return drops `tx`, which rolls the whole order back.
        let mut tx = self.pool.begin().await?;
        Self::lock_cart(&mut tx, cart_id).await?;

        // Lines written by other connections either committed before the
        // lock was granted or wait for this transaction to end.
        let lines = Self::fetch_cart_lines(&mut *tx, cart_id).await?;
        if lines.is_empty() {
            return Ok(None);
        }
        let order = NewOrder::from_lines(owner, &lines, at);

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.owner.as_uuid())
        .bind(OrderStatus::Pending.as_str())
        .bind(order.created_at)
        .execute(&mut *tx)
        .await?;

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_id, product_name, quantity, unit_price_cents)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(item.product_id.as_uuid())
            .bind(&item.product_name)
            .bind(to_i32(item.quantity, "order_items.quantity")?)
            .bind(item.unit_price.cents())
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error(e, "order item", item.product_id.to_string()))?;
        }

        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        Self::touch_cart(&mut tx, cart_id, order.created_at).await?;

        tx.commit().await?;
        Ok(Some(order.into_order()))
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        let rows = sqlx::query(
            "SELECT id, user_id, status, created_at, updated_at FROM orders WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        Ok(self.assemble_orders(rows).await?.into_iter().next())
    }

    async fn orders_for_owner(&self, owner: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, status, created_at, updated_at
            FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(owner.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        self.assemble_orders(rows).await
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let result = sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .bind(at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.order(id).await
    }

    async fn count_orders(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await?;
        to_u64(count, "orders.count")
    }
}

#[async_trait]
impl AccountRepository for PostgresStore {
    async fn account(&self, user_id: UserId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = $1"
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn insert_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (user_id, username, email, first_name, last_name, phone, role,
                                  created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(account.user_id.as_uuid())
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(&account.phone)
        .bind(account.role.as_str())
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| account_write_error(e, account))?;
        Ok(())
    }

    async fn update_account(&self, account: &Account) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET username = $2, email = $3, first_name = $4, last_name = $5, phone = $6,
                role = $7, updated_at = $8
            WHERE user_id = $1
            "#,
        )
        .bind(account.user_id.as_uuid())
        .bind(&account.username)
        .bind(&account.email)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(&account.phone)
        .bind(account.role.as_str())
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| account_write_error(e, account))?;

        Ok(result.rows_affected() > 0)
    }
}
