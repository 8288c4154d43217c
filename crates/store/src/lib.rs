//! Transactional aggregate-state store.
//!
//! Holds exactly one record per aggregate (type, id), overwritten on every
//! save. Writes are staged inside a [`StoreTransaction`] and become visible
//! to other transactions only when the whole transaction commits.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use common::{AggregateId, Version};
pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use postgres::{PostgresStore, PostgresTransaction};
pub use record::{AggregateRecord, UniqueKey};
pub use store::{StoreTransaction, TransactionalStore};
