//! Storage for the storefront: repository traits plus in-memory and
//! PostgreSQL backends.
//!
//! Every trait method is a self-contained unit of work. Methods that touch
//! several rows (placing an order, incrementing a cart line) are atomic:
//! either all of their writes become visible or none do.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod repository;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use query::{ProductOrdering, ProductQuery, SortField};
pub use repository::{
    AccountRepository, CartRepository, CategoryRepository, OrderRepository, ProductRepository,
    ShopStore, TagRepository,
};
