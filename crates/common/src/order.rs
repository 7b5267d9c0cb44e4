//! Order entities and the order status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CartLine, Money, OrderId, ProductId, UserId};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Processing ──► Completed
///    │             │
///    └─────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order has been placed and awaits handling.
    #[default]
    Pending,

    /// Order is being prepared.
    Processing,

    /// Order has been handed over (terminal state).
    Completed,

    /// Order was cancelled (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if processing can start in this status.
    pub fn can_start_processing(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if the order can be completed in this status.
    pub fn can_complete(&self) -> bool {
        matches!(self, OrderStatus::Processing)
    }

    /// Returns true if the order can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Processing)
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Returns true if moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match next {
            OrderStatus::Pending => false,
            OrderStatus::Processing => self.can_start_processing(),
            OrderStatus::Completed => self.can_complete(),
            OrderStatus::Cancelled => self.can_cancel(),
        }
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// A line of a placed order.
///
/// `unit_price` is the product price captured when the order was placed and
/// is never recomputed from the live product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderItem {
    /// Returns the total price for this item (quantity * unit_price).
    pub fn total_price(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub owner: UserId,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Sum of the captured line totals.
    pub fn total_price(&self) -> Money {
        self.items.iter().map(OrderItem::total_price).sum()
    }

    /// Total number of units across all lines.
    pub fn total_items(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }
}

/// An order line about to be persisted.
pub type NewOrderItem = OrderItem;

/// An order about to be persisted, built from a cart at checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub id: OrderId,
    pub owner: UserId,
    pub items: Vec<NewOrderItem>,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    /// Builds an order from cart lines, capturing each product's current
    /// name and price.
    pub fn from_lines(owner: UserId, lines: &[CartLine], at: DateTime<Utc>) -> Self {
        NewOrder {
            id: OrderId::new(),
            owner,
            items: lines
                .iter()
                .map(|line| NewOrderItem {
                    product_id: line.product.id,
                    product_name: line.product.name.clone(),
                    quantity: line.item.quantity,
                    unit_price: line.product.price,
                })
                .collect(),
            created_at: at,
        }
    }

    /// Materializes the order as it looks once stored: status pending.
    pub fn into_order(self) -> Order {
        Order {
            id: self.id,
            owner: self.owner,
            status: OrderStatus::Pending,
            items: self.items,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}
