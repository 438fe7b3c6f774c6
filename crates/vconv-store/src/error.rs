//! Store error types.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A persisted numeric code no longer maps to a known variant.
    #[error("corrupt row: {0}")]
    CorruptRow(#[from] vconv_models::InvalidCode),

    #[error("duplicate {entity} '{value}'")]
    Duplicate {
        entity: &'static str,
        value: String,
    },
}

impl StoreError {
    /// Map a unique-constraint violation onto `Duplicate`, keeping
    /// everything else as a plain database error.
    pub(crate) fn on_insert(err: sqlx::Error, entity: &'static str, value: &str) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return StoreError::Duplicate {
                    entity,
                    value: value.to_string(),
                };
            }
        }
        StoreError::Database(err)
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate { .. })
    }
}
