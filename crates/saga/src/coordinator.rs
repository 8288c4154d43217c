//! Booking saga coordinator: Payment → Schedule → Payout.

use std::sync::Arc;
use std::time::Instant;

use common::AggregateId;
use domain::{
    Aggregate, AggregateRoot, CommandContext, CommandOutcome, CommandPipeline, DomainError,
    OrderCode, Payment, PaymentGateway, PaymentService, PaymentStatus, PayoutProvider,
    PayoutService, ScheduleService, UnitOfWork,
};
use store::TransactionalStore;

use crate::aggregate::BookingSaga;
use crate::error::SagaError;
use crate::events::SagaEvent;
use crate::state::{SagaStatus, SagaStep};

const NO_BANK_ACCOUNT: &str = "vendor has no bank account";

/// What a payment confirmation did.
#[derive(Debug, Clone)]
pub struct SagaReport {
    /// The payment after the gateway check.
    pub payment: Payment,

    /// The status the payment moved to, or None if nothing changed.
    pub transitioned: Option<PaymentStatus>,

    /// The booking saga, when one exists for the payment.
    pub saga: Option<BookingSaga>,

    /// True if this confirmation ran the downstream steps.
    pub driven: bool,
}

impl SagaReport {
    pub fn schedule_id(&self) -> Option<AggregateId> {
        self.saga.as_ref().and_then(BookingSaga::schedule_id)
    }

    pub fn payout_id(&self) -> Option<AggregateId> {
        self.saga.as_ref().and_then(BookingSaga::payout_id)
    }
}

/// Drives a paid payment to a schedule and a vendor payout.
///
/// Each step commits in its own unit of work and is never undone by a later
/// failure. The saga record keeps the step reached and the last error, so a
/// failed booking can be resumed by checking the payment again or calling
/// [`resume`](Self::resume). Schedule and payout creation are idempotent by
/// payment and schedule, so two drivers racing on one payment converge.
pub struct BookingSagaCoordinator<S: TransactionalStore> {
    pipeline: CommandPipeline<S>,
    payments: PaymentService<S>,
    schedules: ScheduleService<S>,
    payouts: PayoutService<S>,
}

impl<S: TransactionalStore> Clone for BookingSagaCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            payments: self.payments.clone(),
            schedules: self.schedules.clone(),
            payouts: self.payouts.clone(),
        }
    }
}

impl<S: TransactionalStore> BookingSagaCoordinator<S> {
    /// Creates a coordinator with its own payment, schedule and payout services.
    pub fn new(
        pipeline: CommandPipeline<S>,
        gateway: Arc<dyn PaymentGateway>,
        provider: Arc<dyn PayoutProvider>,
    ) -> Self {
        Self {
            payments: PaymentService::new(pipeline.clone(), gateway),
            schedules: ScheduleService::new(pipeline.clone()),
            payouts: PayoutService::new(pipeline.clone(), provider),
            pipeline,
        }
    }

    pub fn payments(&self) -> &PaymentService<S> {
        &self.payments
    }

    pub fn schedules(&self) -> &ScheduleService<S> {
        &self.schedules
    }

    pub fn payouts(&self) -> &PayoutService<S> {
        &self.payouts
    }

    /// Checks a payment with the gateway and books what it paid for.
    ///
    /// Errors from the payment check are returned. Downstream steps run when
    /// this check moved the payment to Paid, or when the payment was already
    /// Paid but its saga is missing or failed. Their failures are recorded on
    /// the saga and never fail the confirmation.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn confirm_payment(
        &self,
        ctx: &CommandContext,
        order_code: OrderCode,
    ) -> Result<SagaReport, DomainError> {
        let confirmation = self.payments.confirm_payment(ctx, order_code).await?;
        let payment = confirmation.payment;
        let Some(payment_id) = payment.id() else {
            return Err(DomainError::not_found::<Payment>(order_code));
        };

        let existing = if payment.status() == PaymentStatus::Paid {
            self.get_saga(ctx, payment_id).await?
        } else {
            None
        };
        let should_drive = confirmation.transitioned == Some(PaymentStatus::Paid)
            || (payment.status() == PaymentStatus::Paid
                && existing.as_ref().is_none_or(|s| s.status().can_resume()));

        if !should_drive {
            if existing.is_some() {
                tracing::debug!(%order_code, "booking already driven, nothing to do");
            }
            return Ok(SagaReport {
                payment,
                transitioned: confirmation.transitioned,
                saga: existing,
                driven: false,
            });
        }

        let saga = match self.drive(ctx, &payment).await {
            Ok(saga) => Some(saga),
            Err(e) => {
                tracing::warn!(%order_code, %payment_id, error = %e, "booking saga could not be recorded");
                None
            }
        };
        Ok(SagaReport {
            payment,
            transitioned: confirmation.transitioned,
            saga,
            driven: true,
        })
    }

    /// Drives the booking of a paid payment again.
    ///
    /// A completed saga is returned unchanged.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn resume(
        &self,
        ctx: &CommandContext,
        payment_id: AggregateId,
    ) -> Result<BookingSaga, DomainError> {
        let payment = self.payments.get_payment(ctx, payment_id).await?;
        if payment.status() != PaymentStatus::Paid {
            return Err(SagaError::PaymentNotPaid {
                status: payment.status(),
            }
            .into());
        }
        self.drive(ctx, &payment).await
    }

    /// Returns the saga of a payment, if any.
    pub async fn get_saga(
        &self,
        ctx: &CommandContext,
        payment_id: AggregateId,
    ) -> Result<Option<BookingSaga>, DomainError> {
        const COMMAND: &str = "get_booking_saga";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = find_saga(&mut uow, payment_id).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }

    async fn drive(&self, ctx: &CommandContext, payment: &Payment) -> Result<BookingSaga, DomainError> {
        let started = Instant::now();
        let payment_id = payment
            .id()
            .ok_or_else(|| DomainError::Validation("payment has no id".into()))?;

        let mut saga = self.open(ctx, payment_id, payment.order_code()).await?;
        if saga.status() == SagaStatus::Completed {
            return Ok(saga);
        }

        if saga.step() == SagaStep::CreateSchedule {
            saga = match self
                .schedules
                .create_schedule_for_payment(ctx, payment_id)
                .await
            {
                Ok(schedule) => {
                    let schedule_id = schedule
                        .id()
                        .ok_or_else(|| DomainError::Validation("schedule has no id".into()))?;
                    step_finished(SagaStep::CreateSchedule, "completed");
                    self.record(ctx, payment_id, |s| s.schedule_created(schedule_id))
                        .await?
                }
                Err(e) => return self.fail(ctx, payment_id, SagaStep::CreateSchedule, e, started).await,
            };
        }

        if saga.step() == SagaStep::CreatePayout {
            let schedule_id = saga
                .schedule_id()
                .ok_or_else(|| DomainError::Validation("saga has no schedule".into()))?;
            saga = match self
                .payouts
                .create_payout_for_schedule(ctx, schedule_id)
                .await
            {
                Ok(Some(payout)) => {
                    let payout_id = payout
                        .id()
                        .ok_or_else(|| DomainError::Validation("payout has no id".into()))?;
                    step_finished(SagaStep::CreatePayout, "completed");
                    self.record(ctx, payment_id, |s| s.payout_created(payout_id))
                        .await?
                }
                Ok(None) => {
                    tracing::info!(%payment_id, %schedule_id, "payout skipped: {NO_BANK_ACCOUNT}");
                    step_finished(SagaStep::CreatePayout, "skipped");
                    self.record(ctx, payment_id, |s| s.skip_payout(NO_BANK_ACCOUNT))
                        .await?
                }
                Err(e) => return self.fail(ctx, payment_id, SagaStep::CreatePayout, e, started).await,
            };
        }

        let saga = self.record(ctx, payment_id, BookingSaga::complete).await?;
        metrics::counter!("saga_completed_total").increment(1);
        metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(
            %payment_id,
            schedule_id = ?saga.schedule_id(),
            payout_id = ?saga.payout_id(),
            attempt = saga.attempts(),
            "booking saga completed"
        );
        Ok(saga)
    }

    /// Loads the saga of a payment, creating it or resuming it as needed.
    async fn open(
        &self,
        ctx: &CommandContext,
        payment_id: AggregateId,
        order_code: Option<OrderCode>,
    ) -> Result<BookingSaga, DomainError> {
        const COMMAND: &str = "open_booking_saga";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = open_in(&mut uow, payment_id, order_code).await;

        match self.pipeline.finish(COMMAND, uow, outcome, started).await {
            Err(e) if e.is_conflict() => {
                tracing::info!(%payment_id, "saga opened concurrently, joining it");
                self.get_saga(ctx, payment_id).await?.ok_or(e)
            }
            result => result,
        }
    }

    async fn fail(
        &self,
        ctx: &CommandContext,
        payment_id: AggregateId,
        step: SagaStep,
        error: DomainError,
        started: Instant,
    ) -> Result<BookingSaga, DomainError> {
        tracing::warn!(%payment_id, %step, error = %error, "booking saga step failed");
        step_finished(step, "failed");
        metrics::counter!("saga_failed_total").increment(1);
        metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());
        let message = error.to_string();
        self.record(ctx, payment_id, |s| s.fail(step, message)).await
    }

    /// Saves one step outcome in its own unit of work.
    async fn record<F>(
        &self,
        ctx: &CommandContext,
        payment_id: AggregateId,
        decide: F,
    ) -> Result<BookingSaga, DomainError>
    where
        F: FnOnce(&BookingSaga) -> Result<Vec<SagaEvent>, SagaError>,
    {
        const COMMAND: &str = "record_saga_step";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = record_in(&mut uow, payment_id, decide).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }
}

fn step_finished(step: SagaStep, outcome: &'static str) {
    metrics::counter!("saga_step_total", "step" => step.as_str(), "outcome" => outcome)
        .increment(1);
}

async fn find_saga<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    payment_id: AggregateId,
) -> Result<CommandOutcome<Option<BookingSaga>>, DomainError> {
    let found = uow
        .repository::<BookingSaga>()?
        .find_by_key(&BookingSaga::payment_key(payment_id))
        .await?;
    Ok(CommandOutcome::unchanged(found.map(AggregateRoot::into_state)))
}

async fn open_in<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    payment_id: AggregateId,
    order_code: Option<OrderCode>,
) -> Result<CommandOutcome<BookingSaga>, DomainError> {
    let mut sagas = uow.repository::<BookingSaga>()?;
    let mut root = match sagas
        .find_by_key(&BookingSaga::payment_key(payment_id))
        .await?
    {
        Some(root) => root,
        None => {
            let saga_id = AggregateId::new();
            let mut root = AggregateRoot::<BookingSaga>::new();
            root.execute(|s| s.start(saga_id, payment_id, order_code))?;
            step_finished(SagaStep::ConfirmPayment, "completed");
            tracing::info!(%saga_id, %payment_id, "booking saga started");
            root
        }
    };

    if root.status().can_resume() {
        root.execute(BookingSaga::resume)?;
        tracing::info!(%payment_id, step = %root.step(), attempt = root.attempts(), "booking saga resumed");
    }

    let events = sagas.save(&mut root).await?;
    Ok(CommandOutcome::with_events(root.into_state(), events))
}

async fn record_in<S, F>(
    uow: &mut UnitOfWork<S>,
    payment_id: AggregateId,
    decide: F,
) -> Result<CommandOutcome<BookingSaga>, DomainError>
where
    S: TransactionalStore,
    F: FnOnce(&BookingSaga) -> Result<Vec<SagaEvent>, SagaError>,
{
    let mut sagas = uow.repository::<BookingSaga>()?;
    let mut root = sagas
        .get_by_key(&BookingSaga::payment_key(payment_id))
        .await?;
    root.execute(decide)?;
    let events = sagas.save(&mut root).await?;
    Ok(CommandOutcome::with_events(root.into_state(), events))
}
