//! Payout command handlers.

use std::sync::Arc;
use std::time::Instant;

use common::AggregateId;
use store::TransactionalStore;

use crate::aggregate::AggregateRoot;
use crate::command::{CommandOutcome, CommandPipeline};
use crate::context::CommandContext;
use crate::error::DomainError;
use crate::gateway::{GatewayError, PayoutProvider, TransferRequest, TransferStatus};
use crate::unit_of_work::UnitOfWork;
use crate::value_objects::Money;

use super::{Payout, PayoutDraft, PayoutError, PayoutEvent};

/// Command to request a payout to a vendor.
#[derive(Debug, Clone)]
pub struct RequestPayout {
    pub vendor_id: AggregateId,
    pub amount: Money,
    pub payment_id: Option<AggregateId>,
    pub schedule_id: Option<AggregateId>,
}

impl RequestPayout {
    pub fn validate(&self) -> Result<(), PayoutError> {
        if !self.amount.is_positive() {
            return Err(PayoutError::InvalidAmount(self.amount));
        }
        Ok(())
    }
}

/// Service for managing vendor payouts.
pub struct PayoutService<S: TransactionalStore> {
    pipeline: CommandPipeline<S>,
    provider: Arc<dyn PayoutProvider>,
}

impl<S: TransactionalStore> Clone for PayoutService<S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            provider: Arc::clone(&self.provider),
        }
    }
}

impl<S: TransactionalStore> PayoutService<S> {
    pub fn new(pipeline: CommandPipeline<S>, provider: Arc<dyn PayoutProvider>) -> Self {
        Self { pipeline, provider }
    }

    /// Creates a pending payout to the vendor's bank account.
    #[tracing::instrument(skip(self, ctx, cmd), fields(correlation_id = %ctx.correlation_id(), vendor_id = %cmd.vendor_id))]
    pub async fn request_payout(
        &self,
        ctx: &CommandContext,
        cmd: RequestPayout,
    ) -> Result<Payout, DomainError> {
        const COMMAND: &str = "request_payout";
        let started = Instant::now();
        if let Err(e) = cmd.validate() {
            return self.pipeline.reject(COMMAND, e.into());
        }

        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = request(&mut uow, &cmd).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }

    /// Creates the payout owed for a schedule, at most once per schedule.
    ///
    /// Returns `None` when the vendor has no usable bank account yet.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn create_payout_for_schedule(
        &self,
        ctx: &CommandContext,
        schedule_id: AggregateId,
    ) -> Result<Option<Payout>, DomainError> {
        const COMMAND: &str = "create_payout_for_schedule";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = create_for_schedule(&mut uow, schedule_id).await;

        match self.pipeline.finish(COMMAND, uow, outcome, started).await {
            Err(e) if e.is_conflict() => {
                let existing = self.find_payout_for_schedule(ctx, schedule_id).await?;
                if existing.is_none() {
                    return Err(e);
                }
                tracing::info!(%schedule_id, "payout was created concurrently, using it");
                Ok(existing)
            }
            result => result,
        }
    }

    /// Submits a pending payout to the provider.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn process_payout(
        &self,
        ctx: &CommandContext,
        payout_id: AggregateId,
    ) -> Result<Payout, DomainError> {
        self.submit("process_payout", ctx, payout_id, Payout::start_processing)
            .await
    }

    /// Re-submits a failed payout.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn retry_payout(
        &self,
        ctx: &CommandContext,
        payout_id: AggregateId,
    ) -> Result<Payout, DomainError> {
        self.submit("retry_payout", ctx, payout_id, Payout::retry).await
    }

    /// Records settlement reported out of band.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn complete_payout(
        &self,
        ctx: &CommandContext,
        payout_id: AggregateId,
        transfer_id: Option<String>,
    ) -> Result<Payout, DomainError> {
        self.apply("complete_payout", ctx, payout_id, |p| p.complete(transfer_id))
            .await
    }

    /// Records a failure reported out of band.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn fail_payout(
        &self,
        ctx: &CommandContext,
        payout_id: AggregateId,
        reason: String,
    ) -> Result<Payout, DomainError> {
        self.apply("fail_payout", ctx, payout_id, |p| p.fail(reason))
            .await
    }

    /// Loads a payout by id.
    pub async fn get_payout(
        &self,
        ctx: &CommandContext,
        payout_id: AggregateId,
    ) -> Result<Payout, DomainError> {
        const COMMAND: &str = "get_payout";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = load(&mut uow, payout_id).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }

    /// Returns the payout created for a schedule, if any.
    pub async fn find_payout_for_schedule(
        &self,
        ctx: &CommandContext,
        schedule_id: AggregateId,
    ) -> Result<Option<Payout>, DomainError> {
        const COMMAND: &str = "find_payout_for_schedule";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = find_for_schedule(&mut uow, schedule_id).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }

    async fn apply<F>(
        &self,
        command: &'static str,
        ctx: &CommandContext,
        payout_id: AggregateId,
        decide: F,
    ) -> Result<Payout, DomainError>
    where
        F: FnOnce(&Payout) -> Result<Vec<PayoutEvent>, PayoutError>,
    {
        let started = Instant::now();
        let mut uow = self.pipeline.begin(command, ctx).await?;
        let outcome = mutate(&mut uow, payout_id, decide).await;
        self.pipeline.finish(command, uow, outcome, started).await
    }

    /// Runs one provider attempt.
    ///
    /// The attempt is committed as `Processing` before the provider is
    /// called and the receipt is recorded in a second unit of work. A payout
    /// whose receipt was never recorded stays `Processing` and is not
    /// submitted again; it is settled with
    /// [`complete_payout`](Self::complete_payout) or
    /// [`fail_payout`](Self::fail_payout).
    async fn submit<F>(
        &self,
        command: &'static str,
        ctx: &CommandContext,
        payout_id: AggregateId,
        begin_attempt: F,
    ) -> Result<Payout, DomainError>
    where
        F: FnOnce(&Payout) -> Result<Vec<PayoutEvent>, PayoutError>,
    {
        let started = Instant::now();
        let mut uow = self.pipeline.begin(command, ctx).await?;
        let outcome = open_attempt(&mut uow, payout_id, begin_attempt).await;
        let (request, attempt) = self.pipeline.finish(command, uow, outcome, started).await?;

        let result = match ctx
            .bounded("process_payout", self.provider.process_payout(request))
            .await
        {
            Ok(receipt) => {
                let transfer_id = receipt.transfer_id;
                self.record_receipt(ctx, payout_id, Some(transfer_id.clone()), move |p| {
                    match receipt.status {
                        TransferStatus::Completed => p.complete(Some(transfer_id)),
                        TransferStatus::Processing => p.record_transfer(transfer_id),
                        TransferStatus::Failed(reason) => p.fail(reason),
                    }
                })
                .await
            }
            Err(DomainError::Gateway(GatewayError::Rejected(reason))) => {
                tracing::warn!(%payout_id, %reason, "provider rejected transfer");
                self.record_receipt(ctx, payout_id, None, |p| p.fail(reason))
                    .await
            }
            Err(e) => {
                tracing::error!(
                    %payout_id,
                    attempt,
                    error = %e,
                    "transfer outcome unknown, payout left processing"
                );
                Err(e)
            }
        };

        if let Ok(payout) = &result {
            tracing::info!(
                %payout_id,
                status = %payout.status(),
                attempt,
                "payout submitted"
            );
        }
        result
    }

    async fn record_receipt<F>(
        &self,
        ctx: &CommandContext,
        payout_id: AggregateId,
        transfer_id: Option<String>,
        decide: F,
    ) -> Result<Payout, DomainError>
    where
        F: FnOnce(&Payout) -> Result<Vec<PayoutEvent>, PayoutError>,
    {
        let result = self
            .apply("record_payout_transfer", ctx, payout_id, decide)
            .await;
        if let Err(e) = &result {
            tracing::error!(
                %payout_id,
                ?transfer_id,
                error = %e,
                "transfer sent but not recorded, payout left processing"
            );
        }
        result
    }
}

async fn request<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    cmd: &RequestPayout,
) -> Result<CommandOutcome<Payout>, DomainError> {
    let vendor = uow.vendors()?.get_by_id(cmd.vendor_id).await?;
    let bank_account = vendor
        .bank_account()
        .cloned()
        .ok_or(PayoutError::MissingBankAccount)?;

    let draft = PayoutDraft {
        vendor_id: cmd.vendor_id,
        payment_id: cmd.payment_id,
        schedule_id: cmd.schedule_id,
        amount: cmd.amount,
        bank_account,
    };
    save_new(uow, draft).await
}

async fn create_for_schedule<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    schedule_id: AggregateId,
) -> Result<CommandOutcome<Option<Payout>>, DomainError> {
    if let Some(existing) = uow
        .payouts()?
        .find_by_key(&Payout::schedule_key(schedule_id))
        .await?
    {
        tracing::debug!(%schedule_id, "schedule already has a payout");
        return Ok(CommandOutcome::unchanged(Some(existing.into_state())));
    }

    let schedule = uow.schedules()?.get_by_id(schedule_id).await?;
    let Some(vendor_id) = schedule.vendor_id() else {
        return Ok(CommandOutcome::unchanged(None));
    };
    let vendor = uow.vendors()?.get_by_id(vendor_id).await?;
    let Some(bank_account) = vendor.bank_account().cloned() else {
        tracing::warn!(%schedule_id, %vendor_id, "vendor has no bank account, payout deferred");
        return Ok(CommandOutcome::unchanged(None));
    };

    let draft = PayoutDraft {
        vendor_id,
        payment_id: schedule.payment_id(),
        schedule_id: Some(schedule_id),
        amount: schedule.total_price(),
        bank_account,
    };
    let CommandOutcome { value, events } = save_new(uow, draft).await?;
    Ok(CommandOutcome::with_events(Some(value), events))
}

async fn save_new<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    draft: PayoutDraft,
) -> Result<CommandOutcome<Payout>, DomainError> {
    let payout_id = AggregateId::new();
    let mut root = AggregateRoot::<Payout>::new();
    root.execute(|p| p.create(payout_id, draft))?;
    let events = uow.payouts()?.save(&mut root).await?;

    tracing::info!(%payout_id, amount = %root.amount(), "payout created");
    Ok(CommandOutcome::with_events(root.into_state(), events))
}

/// Moves the payout to `Processing` and builds the transfer request.
async fn open_attempt<S, F>(
    uow: &mut UnitOfWork<S>,
    payout_id: AggregateId,
    begin_attempt: F,
) -> Result<CommandOutcome<(TransferRequest, u32)>, DomainError>
where
    S: TransactionalStore,
    F: FnOnce(&Payout) -> Result<Vec<PayoutEvent>, PayoutError>,
{
    let mut payouts = uow.payouts()?;
    let mut root = payouts.get_by_id(payout_id).await?;
    let bank_account = root
        .bank_account()
        .cloned()
        .ok_or(PayoutError::MissingBankAccount)?;
    root.execute(begin_attempt)?;

    let request = TransferRequest {
        payout_id,
        amount: root.amount(),
        bank_account,
    };
    let attempt = root.attempts();
    let events = payouts.save(&mut root).await?;
    Ok(CommandOutcome::with_events((request, attempt), events))
}

async fn mutate<S, F>(
    uow: &mut UnitOfWork<S>,
    payout_id: AggregateId,
    decide: F,
) -> Result<CommandOutcome<Payout>, DomainError>
where
    S: TransactionalStore,
    F: FnOnce(&Payout) -> Result<Vec<PayoutEvent>, PayoutError>,
{
    let mut payouts = uow.payouts()?;
    let mut root = payouts.get_by_id(payout_id).await?;
    root.execute(decide)?;
    let events = payouts.save(&mut root).await?;
    Ok(CommandOutcome::with_events(root.into_state(), events))
}

async fn load<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    payout_id: AggregateId,
) -> Result<CommandOutcome<Payout>, DomainError> {
    let root = uow.payouts()?.get_by_id(payout_id).await?;
    Ok(CommandOutcome::unchanged(root.into_state()))
}

async fn find_for_schedule<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    schedule_id: AggregateId,
) -> Result<CommandOutcome<Option<Payout>>, DomainError> {
    let found = uow
        .payouts()?
        .find_by_key(&Payout::schedule_key(schedule_id))
        .await?;
    Ok(CommandOutcome::unchanged(found.map(AggregateRoot::into_state)))
}
