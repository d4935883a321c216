use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot reach the call record database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("call record query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("schema migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// None of the candidate directories exist; start from the repo root or
    /// the orchestrator crate.
    #[error("no migrations directory among {}", .0.join(", "))]
    MigrationsMissing(Vec<String>),

    /// A stored document no longer matches its Rust shape, or vice versa.
    #[error("document encoding: {0}")]
    Document(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Query(err)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
