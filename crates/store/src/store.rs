use async_trait::async_trait;

use crate::{AggregateId, AggregateRecord, Result, UniqueKey, Version};

/// A backend able to open atomic transactions over aggregate records.
#[async_trait]
pub trait TransactionalStore: Clone + Send + Sync + 'static {
    /// The transaction handle produced by [`begin`](Self::begin).
    type Transaction: StoreTransaction + 'static;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Transaction>;
}

/// One open, atomic transaction.
///
/// Reads observe the transaction's own staged writes. Nothing written through
/// a transaction is visible elsewhere until [`commit`](Self::commit) succeeds;
/// dropping the handle without committing discards every write.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Loads a record by aggregate type and id.
    async fn load(
        &mut self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateRecord>>;

    /// Loads the record owning a unique secondary key.
    async fn find_by_key(
        &mut self,
        aggregate_type: &str,
        key: &UniqueKey,
    ) -> Result<Option<AggregateRecord>>;

    /// Lists every record of an aggregate type.
    async fn list(&mut self, aggregate_type: &str) -> Result<Vec<AggregateRecord>>;

    /// Writes the full state of an aggregate at `expected_version + 1`.
    ///
    /// Fails with `ConcurrencyConflict` when the stored version is not
    /// `expected_version`, and with `DuplicateKey` when one of `keys` belongs
    /// to another aggregate. Returns the version written.
    async fn upsert(
        &mut self,
        record: AggregateRecord,
        expected_version: Version,
        keys: Vec<UniqueKey>,
    ) -> Result<Version>;

    /// Applies every staged write, or none of them.
    async fn commit(self) -> Result<()>;

    /// Discards every staged write.
    async fn rollback(self) -> Result<()>;
}
