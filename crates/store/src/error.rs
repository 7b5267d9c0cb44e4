use thiserror::Error;

/// Errors that can occur when interacting with a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated (e.g. a slug already in use).
    #[error("Duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// A row cannot be removed because other rows still refer to it.
    #[error("{entity} {id} is still referenced")]
    InUse { entity: &'static str, id: String },

    /// A write referred to a row that does not exist.
    #[error("Missing reference: {0}")]
    MissingReference(String),

    /// A value does not fit the storage representation.
    #[error("Value out of range for {field}: {value}")]
    OutOfRange { field: &'static str, value: String },

    /// A stored row could not be decoded.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// The backend refused the operation (used by fault injection in tests).
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
