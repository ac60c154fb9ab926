use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid store configuration: {0}")]
    Configuration(String),

    #[error("Dialect detection failed: {0}")]
    DialectDetection(sqlx::Error),

    #[error("Task execution not found: {0}")]
    ExecutionNotFound(i64),

    #[error("Id generation lost {0} consecutive counter updates")]
    Concurrency(u32),

    #[error("Invalid paging configuration: {0}")]
    QueryBuild(String),

    #[error("Malformed stored value: {0}")]
    Corrupted(String),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
