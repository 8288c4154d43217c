//! Payment command handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::AggregateId;
use store::TransactionalStore;

use crate::aggregate::AggregateRoot;
use crate::command::{CommandOutcome, CommandPipeline};
use crate::context::CommandContext;
use crate::error::DomainError;
use crate::gateway::{GatewayStatus, PaymentGateway, PaymentLinkRequest};
use crate::unit_of_work::UnitOfWork;
use crate::value_objects::OrderCode;

use super::{CreatePayment, Payment, PaymentError, PaymentStatus};

/// Bound on the best-effort link cancellation after a failed create.
const LINK_CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of checking a payment against the gateway.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    /// The payment after the check.
    pub payment: Payment,

    /// The status the payment moved to, or None if nothing changed.
    pub transitioned: Option<PaymentStatus>,

    /// Status reported by the gateway; None when the payment was already terminal
    /// and the gateway was not asked.
    pub gateway_status: Option<GatewayStatus>,
}

impl PaymentConfirmation {
    /// Returns true if this check moved the payment to Paid.
    pub fn became_paid(&self) -> bool {
        self.transitioned == Some(PaymentStatus::Paid)
    }
}

/// Service for creating and confirming payments.
///
/// Gateway calls run inside the open unit of work and are bounded by the
/// command deadline.
pub struct PaymentService<S: TransactionalStore> {
    pipeline: CommandPipeline<S>,
    gateway: Arc<dyn PaymentGateway>,
}

impl<S: TransactionalStore> Clone for PaymentService<S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            gateway: Arc::clone(&self.gateway),
        }
    }
}

impl<S: TransactionalStore> PaymentService<S> {
    /// Creates a new payment service.
    pub fn new(pipeline: CommandPipeline<S>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { pipeline, gateway }
    }

    /// Creates a payment and its checkout link.
    ///
    /// The user, vendor, pet and every booked offering must exist; the pet
    /// must belong to the user and every offering must be active and sold by
    /// the vendor. If the link was issued but the payment could not be
    /// recorded, the link is cancelled.
    #[tracing::instrument(
        skip(self, ctx, cmd),
        fields(correlation_id = %ctx.correlation_id(), user_id = %cmd.user_id, amount = %cmd.amount)
    )]
    pub async fn create_payment(
        &self,
        ctx: &CommandContext,
        cmd: CreatePayment,
    ) -> Result<Payment, DomainError> {
        const COMMAND: &str = "create_payment";
        let started = Instant::now();
        if let Err(e) = cmd.validate() {
            return self.pipeline.reject(COMMAND, e.into());
        }

        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let mut issued = None;
        let outcome = self.create_in(&mut uow, &cmd, &mut issued).await;
        let result = self.pipeline.finish(COMMAND, uow, outcome, started).await;

        if let (Err(e), Some(order_code)) = (&result, issued) {
            self.cancel_link_best_effort(order_code, e).await;
        }
        result
    }

    /// Checks a payment against the gateway and applies its status.
    ///
    /// PAID, CANCELLED and EXPIRED move a pending payment; any other gateway
    /// status changes nothing. A payment that is already terminal is returned
    /// unchanged without asking the gateway. One retry is made after losing
    /// an optimistic-concurrency race.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn confirm_payment(
        &self,
        ctx: &CommandContext,
        order_code: OrderCode,
    ) -> Result<PaymentConfirmation, DomainError> {
        const COMMAND: &str = "confirm_payment";
        let mut retried = false;
        loop {
            let started = Instant::now();
            let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
            let outcome = self.confirm_in(&mut uow, order_code).await;
            match self.pipeline.finish(COMMAND, uow, outcome, started).await {
                Err(e) if e.is_conflict() && !retried => {
                    tracing::info!(%order_code, error = %e, "confirm lost a concurrent update, retrying");
                    retried = true;
                }
                Ok(confirmation) => {
                    if let Some(status) = confirmation.transitioned {
                        tracing::info!(%order_code, %status, "payment status changed");
                    }
                    return Ok(confirmation);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Cancels a pending payment and its checkout link.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn cancel_payment(
        &self,
        ctx: &CommandContext,
        order_code: OrderCode,
        reason: Option<String>,
    ) -> Result<Payment, DomainError> {
        const COMMAND: &str = "cancel_payment";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = self.cancel_in(&mut uow, order_code, reason).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }

    /// Loads a payment by id.
    pub async fn get_payment(
        &self,
        ctx: &CommandContext,
        payment_id: AggregateId,
    ) -> Result<Payment, DomainError> {
        const COMMAND: &str = "get_payment";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = load_by_id(&mut uow, payment_id).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }

    /// Loads a payment by its gateway order code.
    pub async fn get_payment_by_order_code(
        &self,
        ctx: &CommandContext,
        order_code: OrderCode,
    ) -> Result<Payment, DomainError> {
        const COMMAND: &str = "get_payment_by_order_code";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = load_by_order_code(&mut uow, order_code).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }

    async fn create_in(
        &self,
        uow: &mut UnitOfWork<S>,
        cmd: &CreatePayment,
        issued: &mut Option<OrderCode>,
    ) -> Result<CommandOutcome<Payment>, DomainError> {
        uow.users()?.get_by_id(cmd.user_id).await?;
        uow.vendors()?.get_by_id(cmd.vendor_id).await?;
        let pet = uow.pets()?.get_by_id(cmd.pet_id).await?;
        if pet.owner_id() != Some(cmd.user_id) {
            return Err(PaymentError::PetNotOwned(cmd.pet_id).into());
        }

        let mut offerings = uow.offerings()?;
        for service_id in &cmd.service_ids {
            let offering = offerings.get_by_id(*service_id).await?;
            if !offering.bookable_with(cmd.vendor_id) {
                return Err(PaymentError::ServiceNotOffered(*service_id).into());
            }
        }

        let ctx = uow.context().clone();
        let request = PaymentLinkRequest {
            amount: cmd.amount,
            description: cmd.description.clone(),
            items: cmd.items.clone(),
        };
        let link = ctx
            .bounded("create_payment_link", self.gateway.create_payment_link(request))
            .await?;
        *issued = Some(link.order_code);

        let mut root = AggregateRoot::<Payment>::new();
        root.execute(|p| p.create(AggregateId::new(), cmd, &link))?;
        let events = uow.payments()?.save(&mut root).await?;

        tracing::info!(order_code = %link.order_code, "payment created");
        Ok(CommandOutcome::with_events(root.into_state(), events))
    }

    async fn confirm_in(
        &self,
        uow: &mut UnitOfWork<S>,
        order_code: OrderCode,
    ) -> Result<CommandOutcome<PaymentConfirmation>, DomainError> {
        let ctx = uow.context().clone();
        let mut payments = uow.payments()?;
        let mut root = payments
            .get_by_key(&Payment::order_code_key(order_code))
            .await?;

        if root.is_terminal() {
            tracing::debug!(%order_code, status = %root.status(), "payment already final");
            return Ok(CommandOutcome::unchanged(PaymentConfirmation {
                payment: root.into_state(),
                transitioned: None,
                gateway_status: None,
            }));
        }

        let info = ctx
            .bounded(
                "get_payment_link_information",
                self.gateway.get_payment_link_information(order_code),
            )
            .await?;
        if info.amount != root.amount() {
            tracing::warn!(
                %order_code,
                gateway_amount = %info.amount,
                amount = %root.amount(),
                "gateway amount differs from payment amount"
            );
        }

        root.execute(|p| p.apply_gateway_status(&info.status))?;
        let transitioned = root.has_changes().then(|| root.status());
        let events = payments.save(&mut root).await?;

        Ok(CommandOutcome::with_events(
            PaymentConfirmation {
                payment: root.into_state(),
                transitioned,
                gateway_status: Some(info.status),
            },
            events,
        ))
    }

    async fn cancel_in(
        &self,
        uow: &mut UnitOfWork<S>,
        order_code: OrderCode,
        reason: Option<String>,
    ) -> Result<CommandOutcome<Payment>, DomainError> {
        let ctx = uow.context().clone();
        let mut payments = uow.payments()?;
        let mut root = payments
            .get_by_key(&Payment::order_code_key(order_code))
            .await?;

        root.execute(|p| p.cancel(reason.clone()))?;
        ctx.bounded(
            "cancel_payment_link",
            self.gateway.cancel_payment_link(order_code, reason),
        )
        .await?;
        let events = payments.save(&mut root).await?;

        Ok(CommandOutcome::with_events(root.into_state(), events))
    }

    async fn cancel_link_best_effort(&self, order_code: OrderCode, cause: &DomainError) {
        let reason = Some(format!("payment could not be recorded: {cause}"));
        let result = tokio::time::timeout(
            LINK_CANCEL_TIMEOUT,
            self.gateway.cancel_payment_link(order_code, reason),
        )
        .await;

        match result {
            Ok(Ok(())) => tracing::info!(%order_code, "orphaned payment link cancelled"),
            Ok(Err(e)) => tracing::warn!(%order_code, error = %e, "could not cancel orphaned payment link"),
            Err(_) => tracing::warn!(%order_code, "timed out cancelling orphaned payment link"),
        }
    }
}

async fn load_by_id<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    payment_id: AggregateId,
) -> Result<CommandOutcome<Payment>, DomainError> {
    let root = uow.payments()?.get_by_id(payment_id).await?;
    Ok(CommandOutcome::unchanged(root.into_state()))
}

async fn load_by_order_code<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    order_code: OrderCode,
) -> Result<CommandOutcome<Payment>, DomainError> {
    let root = uow
        .payments()?
        .get_by_key(&Payment::order_code_key(order_code))
        .await?;
    Ok(CommandOutcome::unchanged(root.into_state()))
}
