//! Aggregate repository bound to an open store transaction.

use std::marker::PhantomData;

use common::AggregateId;
use event_bus::EventEnvelope;
use store::{AggregateRecord, StoreTransaction, UniqueKey};

use crate::aggregate::{Aggregate, AggregateRoot, DomainEvent};
use crate::context::CommandContext;
use crate::error::DomainError;

/// Loads and saves one aggregate type inside a unit of work's transaction.
///
/// Obtained from [`UnitOfWork`](crate::UnitOfWork) accessors; every read and
/// write goes through the same transaction and is bounded by the command
/// context's deadline.
pub struct Repository<'a, T, A>
where
    T: StoreTransaction,
    A: Aggregate,
{
    tx: &'a mut T,
    ctx: &'a CommandContext,
    _phantom: PhantomData<A>,
}

impl<'a, T, A> Repository<'a, T, A>
where
    T: StoreTransaction,
    A: Aggregate,
{
    pub(crate) fn new(tx: &'a mut T, ctx: &'a CommandContext) -> Self {
        Self {
            tx,
            ctx,
            _phantom: PhantomData,
        }
    }

    fn hydrate(record: AggregateRecord) -> Result<AggregateRoot<A>, DomainError> {
        let version = record.version;
        let state: A = record.into_state()?;
        Ok(AggregateRoot::from_parts(state, version))
    }

    /// Loads an aggregate by id, returning None if it doesn't exist.
    pub async fn find(
        &mut self,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateRoot<A>>, DomainError> {
        let record = self
            .ctx
            .bounded("load", self.tx.load(A::aggregate_type(), aggregate_id))
            .await?;
        record.map(Self::hydrate).transpose()
    }

    /// Loads an aggregate by id.
    pub async fn get_by_id(
        &mut self,
        aggregate_id: AggregateId,
    ) -> Result<AggregateRoot<A>, DomainError> {
        self.find(aggregate_id)
            .await?
            .ok_or_else(|| DomainError::not_found::<A>(aggregate_id))
    }

    /// Loads the aggregate owning a unique key, returning None if no aggregate owns it.
    pub async fn find_by_key(
        &mut self,
        key: &UniqueKey,
    ) -> Result<Option<AggregateRoot<A>>, DomainError> {
        let record = self
            .ctx
            .bounded("find_by_key", self.tx.find_by_key(A::aggregate_type(), key))
            .await?;
        record.map(Self::hydrate).transpose()
    }

    /// Loads the aggregate owning a unique key.
    pub async fn get_by_key(&mut self, key: &UniqueKey) -> Result<AggregateRoot<A>, DomainError> {
        self.find_by_key(key)
            .await?
            .ok_or_else(|| DomainError::not_found::<A>(&key.value))
    }

    /// Loads every aggregate of this type.
    pub async fn list(&mut self) -> Result<Vec<AggregateRoot<A>>, DomainError> {
        let records = self
            .ctx
            .bounded("list", self.tx.list(A::aggregate_type()))
            .await?;
        records.into_iter().map(Self::hydrate).collect()
    }

    /// Writes the aggregate's full state and hands back its uncommitted events.
    ///
    /// The events are drained from the root only after the write succeeded,
    /// so a failed save can be retried without losing them. Saving a root
    /// without uncommitted events writes nothing and returns no events.
    pub async fn save(
        &mut self,
        root: &mut AggregateRoot<A>,
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        if !root.has_changes() {
            return Ok(Vec::new());
        }

        let aggregate_id = root.id().ok_or_else(|| {
            DomainError::Validation(format!(
                "cannot save a {} without an id",
                A::aggregate_type()
            ))
        })?;
        let expected = root.version();
        let next = expected.next();

        let envelopes = root
            .uncommitted_events()
            .iter()
            .map(|event| self.envelope(aggregate_id, next, event))
            .collect::<Result<Vec<_>, _>>()?;

        let record = AggregateRecord::from_state(
            aggregate_id,
            A::aggregate_type(),
            next,
            root.state(),
        )?;
        let keys = root.state().unique_keys();

        let written = self
            .ctx
            .bounded("save", self.tx.upsert(record, expected, keys))
            .await?;

        root.mark_saved(written);
        tracing::debug!(
            aggregate_type = A::aggregate_type(),
            %aggregate_id,
            version = %written,
            events = envelopes.len(),
            "aggregate saved"
        );

        Ok(envelopes)
    }

    fn envelope(
        &self,
        aggregate_id: AggregateId,
        version: common::Version,
        event: &A::Event,
    ) -> Result<EventEnvelope, DomainError> {
        Ok(EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type(A::aggregate_type())
            .event_type(event.event_type())
            .version(version)
            .payload(event)?
            .correlation_id(self.ctx.correlation_id())
            .build()?)
    }
}
