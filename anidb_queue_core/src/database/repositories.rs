//! Repository pattern implementation for database access
//!
//! Each repository wraps the shared pool and implements the storage seam the
//! rest of the crate talks to.

pub mod anidb_record;
pub mod command_request;
pub mod session_state;

use crate::Result;
use async_trait::async_trait;

pub use anidb_record::SqliteRecordStore;
pub use command_request::SqliteCommandStore;
pub use session_state::SessionStateRepository;

/// Base repository trait for common operations
#[async_trait]
pub trait Repository<T> {
    /// Create a new entity
    async fn create(&self, entity: &T) -> Result<i64>;

    /// Find an entity by ID
    async fn find_by_id(&self, id: i64) -> Result<Option<T>>;

    /// Update an existing entity
    async fn update(&self, entity: &T) -> Result<()>;

    /// Delete an entity by ID
    async fn delete(&self, id: i64) -> Result<()>;

    /// Count all entities
    async fn count(&self) -> Result<i64>;
}
