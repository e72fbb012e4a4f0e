//! Persistence sink for readings
//!
//! ## Design
//!
//! - **Trait-based**: `ReadingStore` allows swapping implementations
//! - **Append-only**: one row per persisted reading, never updated
//! - **Async**: all operations are async for use from the monitoring task
//!
//! ## Backends
//!
//! - **SQLite** (default): embedded database file, one scoped connection per call
//! - **In-Memory**: no persistence, for tests or `"backend": "none"`
//!
//! ## Usage
//!
//! ```no_run
//! use sensor_alerting::storage::{ReadingStore, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::init("./sensor_data.db").await?;
//!     println!("{}", store.get_stats().await?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, ReadingStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use schema::StoredRecord;
