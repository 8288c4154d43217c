//! Unit of work: several repositories bound to one atomic transaction.

use std::time::Duration;

use store::{StoreTransaction, TransactionalStore};

use crate::aggregate::Aggregate;
use crate::context::CommandContext;
use crate::error::DomainError;
use crate::repository::Repository;
use crate::{Offering, Payment, Payout, Pet, Schedule, User, Vendor};

/// Lifecycle of a unit of work.
///
/// ```text
/// Created ──► Open ──┬──► Committed ──┐
///                    └──► RolledBack ─┴──► Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitOfWorkStatus {
    Created,
    Open,
    Committed,
    RolledBack,
    Closed,
}

impl UnitOfWorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitOfWorkStatus::Created => "Created",
            UnitOfWorkStatus::Open => "Open",
            UnitOfWorkStatus::Committed => "Committed",
            UnitOfWorkStatus::RolledBack => "RolledBack",
            UnitOfWorkStatus::Closed => "Closed",
        }
    }
}

impl std::fmt::Display for UnitOfWorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Creates units of work over one store.
#[derive(Clone)]
pub struct UnitOfWorkFactory<S: TransactionalStore> {
    store: S,
    finalize_timeout: Duration,
}

impl<S: TransactionalStore> UnitOfWorkFactory<S> {
    /// Creates a factory; `finalize_timeout` bounds every commit and rollback.
    pub fn new(store: S, finalize_timeout: Duration) -> Self {
        Self {
            store,
            finalize_timeout,
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates a fresh unit of work in the `Created` state.
    pub fn create(&self) -> UnitOfWork<S> {
        UnitOfWork {
            store: self.store.clone(),
            tx: None,
            ctx: CommandContext::new(),
            status: UnitOfWorkStatus::Created,
            finalize_timeout: self.finalize_timeout,
        }
    }
}

/// A handle binding repositories for every aggregate type to one transaction.
///
/// Writes made through any accessor become durable together on
/// [`commit`](Self::commit) or not at all. Dropping an open unit discards
/// its writes.
pub struct UnitOfWork<S: TransactionalStore> {
    store: S,
    tx: Option<S::Transaction>,
    ctx: CommandContext,
    status: UnitOfWorkStatus,
    finalize_timeout: Duration,
}

impl<S: TransactionalStore> UnitOfWork<S> {
    /// Returns the current lifecycle status.
    pub fn status(&self) -> UnitOfWorkStatus {
        self.status
    }

    /// Returns the context the unit was opened with.
    pub fn context(&self) -> &CommandContext {
        &self.ctx
    }

    /// Opens the transaction.
    ///
    /// Refuses a cancelled or expired context, so no transaction is opened
    /// for a command that can no longer complete.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn begin(&mut self, ctx: &CommandContext) -> Result<(), DomainError> {
        if self.status != UnitOfWorkStatus::Created {
            return Err(DomainError::UnitOfWorkNotOpen {
                status: self.status,
            });
        }
        ctx.ensure_active()?;

        let tx = ctx.bounded("begin", self.store.begin()).await?;
        self.tx = Some(tx);
        self.ctx = ctx.clone();
        self.status = UnitOfWorkStatus::Open;

        metrics::counter!("uow_begin_total").increment(1);
        tracing::debug!("unit of work opened");
        Ok(())
    }

    /// Returns a repository for any aggregate type, bound to this transaction.
    pub fn repository<A: Aggregate>(
        &mut self,
    ) -> Result<Repository<'_, S::Transaction, A>, DomainError> {
        match (&mut self.tx, self.status) {
            (Some(tx), UnitOfWorkStatus::Open) => Ok(Repository::new(tx, &self.ctx)),
            _ => Err(DomainError::UnitOfWorkNotOpen {
                status: self.status,
            }),
        }
    }

    pub fn users(&mut self) -> Result<Repository<'_, S::Transaction, User>, DomainError> {
        self.repository()
    }

    pub fn pets(&mut self) -> Result<Repository<'_, S::Transaction, Pet>, DomainError> {
        self.repository()
    }

    pub fn vendors(&mut self) -> Result<Repository<'_, S::Transaction, Vendor>, DomainError> {
        self.repository()
    }

    pub fn offerings(&mut self) -> Result<Repository<'_, S::Transaction, Offering>, DomainError> {
        self.repository()
    }

    pub fn payments(&mut self) -> Result<Repository<'_, S::Transaction, Payment>, DomainError> {
        self.repository()
    }

    pub fn schedules(&mut self) -> Result<Repository<'_, S::Transaction, Schedule>, DomainError> {
        self.repository()
    }

    pub fn payouts(&mut self) -> Result<Repository<'_, S::Transaction, Payout>, DomainError> {
        self.repository()
    }

    /// Durably applies every write made through this unit, or none of them.
    ///
    /// Bounded by the finalize timeout rather than the command deadline, so
    /// a commit already in flight completes even if the command was cancelled.
    /// A failed commit leaves the unit `RolledBack`.
    #[tracing::instrument(skip(self), fields(correlation_id = %self.ctx.correlation_id()))]
    pub async fn commit(&mut self) -> Result<(), DomainError> {
        let tx = self.take_open()?;

        let result = match tokio::time::timeout(self.finalize_timeout, tx.commit()).await {
            Ok(result) => result.map_err(DomainError::from),
            Err(_) => Err(DomainError::DeadlineExceeded("commit")),
        };

        match result {
            Ok(()) => {
                self.status = UnitOfWorkStatus::Committed;
                metrics::counter!("uow_commit_total").increment(1);
                tracing::info!("unit of work committed");
                Ok(())
            }
            Err(e) => {
                self.status = UnitOfWorkStatus::RolledBack;
                metrics::counter!("uow_commit_failed_total").increment(1);
                tracing::warn!(error = %e, "commit failed, transaction rolled back");
                Err(e)
            }
        }
    }

    /// Discards every write made through this unit.
    ///
    /// A no-op once the unit is committed, rolled back or closed.
    #[tracing::instrument(skip(self), fields(correlation_id = %self.ctx.correlation_id()))]
    pub async fn rollback(&mut self) -> Result<(), DomainError> {
        if self.status != UnitOfWorkStatus::Open {
            return Ok(());
        }
        let tx = self.take_open()?;
        self.status = UnitOfWorkStatus::RolledBack;
        metrics::counter!("uow_rollback_total").increment(1);

        let result = match tokio::time::timeout(self.finalize_timeout, tx.rollback()).await {
            Ok(result) => result.map_err(DomainError::from),
            Err(_) => Err(DomainError::DeadlineExceeded("rollback")),
        };

        match &result {
            Ok(()) => tracing::warn!("unit of work rolled back"),
            Err(e) => tracing::error!(error = %e, "rollback failed"),
        }
        result
    }

    /// Releases the unit. Rolls back a still-open transaction.
    ///
    /// Safe to call any number of times, after commit or rollback.
    pub async fn close(&mut self) {
        if self.status == UnitOfWorkStatus::Closed {
            return;
        }
        // Rollback failures are already logged.
        let _ = self.rollback().await;
        self.status = UnitOfWorkStatus::Closed;
    }

    fn take_open(&mut self) -> Result<S::Transaction, DomainError> {
        match (self.status, self.tx.take()) {
            (UnitOfWorkStatus::Open, Some(tx)) => Ok(tx),
            _ => Err(DomainError::UnitOfWorkNotOpen {
                status: self.status,
            }),
        }
    }
}

impl<S: TransactionalStore> Drop for UnitOfWork<S> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::warn!(
                correlation_id = %self.ctx.correlation_id(),
                "unit of work dropped while open, writes discarded"
            );
        }
    }
}
