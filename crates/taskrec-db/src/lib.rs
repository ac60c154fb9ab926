pub mod dialect;
pub mod error;
pub mod explorer;
pub mod factory;
pub mod incrementer;
pub mod memory;
pub mod paging;
pub mod repository;
pub mod schema;

// Re-exports
pub use dialect::{resolve_dialect, Dialect};
pub use error::{Error, Result};
pub use explorer::ExecutionExplorer;
pub use factory::{install_drivers, RepositoryFactory, StoreConfig, DEFAULT_TABLE_PREFIX};
pub use incrementer::{ExecutionIncrementer, IncrementerStrategy};
pub use memory::InMemoryExecutionRepository;
pub use paging::{PagingQuery, PagingQueryBuilder};
pub use repository::{DbExecutionRepository, ExecutionRepository};
