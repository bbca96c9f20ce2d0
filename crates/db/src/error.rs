use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A record could not be written.
    #[error("Failed to insert into {table}: {reason}")]
    Insert { table: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl DbError {
    pub fn insert(table: &str, source: impl std::fmt::Display) -> Self {
        Self::Insert {
            table: table.to_string(),
            reason: source.to_string(),
        }
    }
}
