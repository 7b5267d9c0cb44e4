//! Cart engine: resolving a caller's cart and mutating its lines.

use common::{
    Cart, CartIdentity, CartItemId, CartLine, Money, Principal, ProductId, SessionToken,
};
use serde::Serialize;
use store::ShopStore;
use thiserror::Error;

use crate::error::DomainError;
use crate::locks::CartLocks;

/// Largest quantity a single cart line may hold.
pub const MAX_LINE_QUANTITY: i64 = i32::MAX as i64;

/// Errors raised by cart operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    /// Neither an authenticated user nor a usable session token.
    #[error("no user or session to attach a cart to")]
    IdentityMissing,

    /// The product does not exist or is not active.
    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("product is out of stock: {0}")]
    OutOfStock(ProductId),

    #[error("insufficient quantity: requested {requested}, available {available}")]
    InsufficientQuantity { requested: i64, available: u32 },

    /// The item is not a line of this cart.
    #[error("item not found: {0}")]
    ItemNotFound(CartItemId),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(i64),

    /// The cart's total price would not fit in the money representation.
    #[error("cart total is out of range")]
    TotalOutOfRange,
}

/// Derived cart totals, recomputed on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CartTotals {
    pub total_price: Money,
    pub total_items: u64,
}

/// A cart with its lines and totals, as returned by every cart operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartView {
    pub cart: Cart,
    pub lines: Vec<CartLine>,
    pub totals: CartTotals,
}

/// Sums line totals at live product prices.
pub fn compute_totals(lines: &[CartLine]) -> Result<CartTotals, CartError> {
    sum_lines(
        lines
            .iter()
            .map(|line| (line.product.price, line.item.quantity)),
    )
}

/// Totals the cart would have if `product_id`'s line held `quantity` units
/// at `price`, adding the line when the cart does not have it yet.
fn totals_with_line(
    lines: &[CartLine],
    product_id: ProductId,
    price: Money,
    quantity: u32,
) -> Result<CartTotals, CartError> {
    let others = lines
        .iter()
        .filter(|line| line.product.id != product_id)
        .map(|line| (line.product.price, line.item.quantity));
    sum_lines(others.chain(std::iter::once((price, quantity))))
}

fn sum_lines(lines: impl IntoIterator<Item = (Money, u32)>) -> Result<CartTotals, CartError> {
    lines
        .into_iter()
        .try_fold(CartTotals::default(), |totals, (price, quantity)| {
            let total_price = price
                .checked_multiply(quantity)
                .and_then(|line_total| totals.total_price.checked_add(line_total))
                .ok_or(CartError::TotalOutOfRange)?;
            Ok(CartTotals {
                total_price,
                total_items: totals.total_items + u64::from(quantity),
            })
        })
}

/// Picks the cart identity for a request.
///
/// The authenticated user wins over a session token.
pub fn resolve_identity(
    principal: Option<&Principal>,
    session: Option<SessionToken>,
) -> Result<CartIdentity, CartError> {
    CartIdentity::resolve(principal.map(|p| p.user_id), session).ok_or(CartError::IdentityMissing)
}

/// Cart operations over a storage backend.
///
/// Mutations of one cart are serialized through [`CartLocks`], shared with
/// checkout so a cart cannot change while it is being converted to an order.
pub struct CartEngine<S: ShopStore> {
    store: S,
    locks: CartLocks,
}

impl<S: ShopStore> CartEngine<S> {
    pub fn new(store: S, locks: CartLocks) -> Self {
        Self { store, locks }
    }

    /// Returns the cart owned by `identity`, creating it on first access.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_cart(&self, identity: &CartIdentity) -> Result<Cart, DomainError> {
        Ok(self.store.find_or_create_cart(identity).await?)
    }

    /// Loads the cart's lines and totals.
    pub async fn view(&self, cart: &Cart) -> Result<CartView, DomainError> {
        let lines = self.store.cart_lines(cart.id).await?;
        let totals = compute_totals(&lines)?;
        Ok(CartView {
            cart: cart.clone(),
            lines,
            totals,
        })
    }

    /// Adds `quantity` units of a product, incrementing an existing line.
    ///
    /// Stock is checked against the requested quantity only; nothing is
    /// reserved. The change is refused when the resulting line or cart total
    /// would be out of range.
    #[tracing::instrument(skip(self, cart), fields(cart_id = %cart.id))]
    pub async fn add_item(
        &self,
        cart: &Cart,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<CartView, DomainError> {
        if quantity < 1 {
            return Err(CartError::InvalidQuantity(quantity).into());
        }

        let product = match self.store.product(product_id).await? {
            Some(product) if product.is_active => product,
            _ => return Err(CartError::ProductNotFound(product_id).into()),
        };
        if !product.in_stock {
            return Err(CartError::OutOfStock(product_id).into());
        }
        if quantity > i64::from(product.quantity_on_hand) {
            return Err(CartError::InsufficientQuantity {
                requested: quantity,
                available: product.quantity_on_hand,
            }
            .into());
        }
        // Bounded by quantity_on_hand above.
        let quantity = u32::try_from(quantity).map_err(|_| CartError::InvalidQuantity(quantity))?;

        let _guard = self.locks.lock(cart.id).await;
        let lines = self.store.cart_lines(cart.id).await?;
        let current = lines
            .iter()
            .find(|line| line.product.id == product_id)
            .map_or(0, |line| i64::from(line.item.quantity));
        let line_quantity = current + i64::from(quantity);
        if line_quantity > MAX_LINE_QUANTITY {
            return Err(CartError::InvalidQuantity(line_quantity).into());
        }
        // Bounded by MAX_LINE_QUANTITY above.
        let line_quantity = line_quantity as u32;
        totals_with_line(&lines, product_id, product.price, line_quantity)?;

        let item = self
            .store
            .add_or_increment_item(cart.id, product_id, quantity)
            .await?;

        metrics::counter!("cart_items_added_total").increment(u64::from(quantity));
        tracing::debug!(item_id = %item.id, line_quantity = item.quantity, "Item added to cart");

        self.view(cart).await
    }

    /// Sets a line's quantity; zero or less removes the line.
    ///
    /// The new quantity is not checked against stock, but is refused when
    /// the cart total would be out of range.
    #[tracing::instrument(skip(self, cart), fields(cart_id = %cart.id))]
    pub async fn update_item_quantity(
        &self,
        cart: &Cart,
        item_id: CartItemId,
        quantity: i64,
    ) -> Result<CartView, DomainError> {
        if quantity > MAX_LINE_QUANTITY {
            return Err(CartError::InvalidQuantity(quantity).into());
        }

        let _guard = self.locks.lock(cart.id).await;
        let found = match u32::try_from(quantity) {
            Ok(quantity) if quantity > 0 => {
                let lines = self.store.cart_lines(cart.id).await?;
                let Some(line) = lines.iter().find(|line| line.item.id == item_id) else {
                    return Err(CartError::ItemNotFound(item_id).into());
                };
                totals_with_line(&lines, line.product.id, line.product.price, quantity)?;
                self.store
                    .set_item_quantity(cart.id, item_id, quantity)
                    .await?
                    .is_some()
            }
            _ => self.store.remove_item(cart.id, item_id).await?,
        };
        if !found {
            return Err(CartError::ItemNotFound(item_id).into());
        }

        self.view(cart).await
    }

    #[tracing::instrument(skip(self, cart), fields(cart_id = %cart.id))]
    pub async fn remove_item(
        &self,
        cart: &Cart,
        item_id: CartItemId,
    ) -> Result<CartView, DomainError> {
        let _guard = self.locks.lock(cart.id).await;
        if !self.store.remove_item(cart.id, item_id).await? {
            return Err(CartError::ItemNotFound(item_id).into());
        }

        self.view(cart).await
    }

    /// Removes every line. Clearing an empty cart succeeds.
    #[tracing::instrument(skip(self, cart), fields(cart_id = %cart.id))]
    pub async fn clear(&self, cart: &Cart) -> Result<CartView, DomainError> {
        let _guard = self.locks.lock(cart.id).await;
        let removed = self.store.clear_cart(cart.id).await?;
        tracing::debug!(removed, "Cart cleared");

        self.view(cart).await
    }
}
