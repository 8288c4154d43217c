//! Schedule command handlers.

use std::time::Instant;

use chrono::{DateTime, Utc};
use common::AggregateId;
use store::TransactionalStore;

use crate::aggregate::AggregateRoot;
use crate::command::{CommandOutcome, CommandPipeline};
use crate::context::CommandContext;
use crate::error::DomainError;
use crate::payment::PaymentStatus;
use crate::unit_of_work::UnitOfWork;
use crate::value_objects::Money;

use super::{
    AssignedPet, BookedService, BookedUser, BookedVendor, Schedule, ScheduleDraft, ScheduleError,
    ScheduleEvent,
};

/// Command to book a schedule directly, without a payment.
#[derive(Debug, Clone)]
pub struct CreateSchedule {
    pub user_id: AggregateId,
    pub vendor_id: AggregateId,
    pub pet_id: AggregateId,
    pub service_ids: Vec<AggregateId>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl CreateSchedule {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.service_ids.is_empty() {
            return Err(ScheduleError::NoServices);
        }
        if self.start_time >= self.end_time {
            return Err(ScheduleError::InvalidTimeWindow);
        }
        Ok(())
    }
}

/// Service for managing schedules.
pub struct ScheduleService<S: TransactionalStore> {
    pipeline: CommandPipeline<S>,
}

impl<S: TransactionalStore> Clone for ScheduleService<S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
        }
    }
}

impl<S: TransactionalStore> ScheduleService<S> {
    pub fn new(pipeline: CommandPipeline<S>) -> Self {
        Self { pipeline }
    }

    /// Books a schedule directly.
    #[tracing::instrument(skip(self, ctx, cmd), fields(correlation_id = %ctx.correlation_id(), vendor_id = %cmd.vendor_id))]
    pub async fn create_schedule(
        &self,
        ctx: &CommandContext,
        cmd: CreateSchedule,
    ) -> Result<Schedule, DomainError> {
        const COMMAND: &str = "create_schedule";
        let started = Instant::now();
        if let Err(e) = cmd.validate() {
            return self.pipeline.reject(COMMAND, e.into());
        }

        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = create_direct(&mut uow, &cmd).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }

    /// Books the schedule paid for by a payment, at most once per payment.
    ///
    /// Returns the existing schedule when the payment already has one,
    /// including when a concurrent call created it first.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn create_schedule_for_payment(
        &self,
        ctx: &CommandContext,
        payment_id: AggregateId,
    ) -> Result<Schedule, DomainError> {
        const COMMAND: &str = "create_schedule_for_payment";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = create_for_payment(&mut uow, payment_id).await;

        match self.pipeline.finish(COMMAND, uow, outcome, started).await {
            Err(e) if e.is_conflict() => {
                match self.find_schedule_for_payment(ctx, payment_id).await? {
                    Some(existing) => {
                        tracing::info!(%payment_id, "schedule was created concurrently, using it");
                        Ok(existing)
                    }
                    None => Err(e),
                }
            }
            result => result,
        }
    }

    /// Vendor accepts a booking.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn confirm_schedule(
        &self,
        ctx: &CommandContext,
        schedule_id: AggregateId,
    ) -> Result<Schedule, DomainError> {
        self.transition("confirm_schedule", ctx, schedule_id, Schedule::confirm)
            .await
    }

    /// Marks a booking as delivered.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn complete_schedule(
        &self,
        ctx: &CommandContext,
        schedule_id: AggregateId,
    ) -> Result<Schedule, DomainError> {
        self.transition("complete_schedule", ctx, schedule_id, Schedule::complete)
            .await
    }

    /// Calls a booking off.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn cancel_schedule(
        &self,
        ctx: &CommandContext,
        schedule_id: AggregateId,
        reason: Option<String>,
    ) -> Result<Schedule, DomainError> {
        self.transition("cancel_schedule", ctx, schedule_id, |s| s.cancel(reason))
            .await
    }

    /// Loads a schedule by id.
    pub async fn get_schedule(
        &self,
        ctx: &CommandContext,
        schedule_id: AggregateId,
    ) -> Result<Schedule, DomainError> {
        const COMMAND: &str = "get_schedule";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = load(&mut uow, schedule_id).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }

    /// Returns the schedule booked through a payment, if any.
    pub async fn find_schedule_for_payment(
        &self,
        ctx: &CommandContext,
        payment_id: AggregateId,
    ) -> Result<Option<Schedule>, DomainError> {
        const COMMAND: &str = "find_schedule_for_payment";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = find_for_payment(&mut uow, payment_id).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }

    async fn transition<F>(
        &self,
        command: &'static str,
        ctx: &CommandContext,
        schedule_id: AggregateId,
        decide: F,
    ) -> Result<Schedule, DomainError>
    where
        F: FnOnce(&Schedule) -> Result<Vec<ScheduleEvent>, ScheduleError>,
    {
        let started = Instant::now();
        let mut uow = self.pipeline.begin(command, ctx).await?;
        let outcome = mutate(&mut uow, schedule_id, decide).await;
        let result = self.pipeline.finish(command, uow, outcome, started).await;
        if let Ok(schedule) = &result {
            tracing::info!(%schedule_id, status = %schedule.status(), "schedule status changed");
        }
        result
    }
}

struct BookingRefs<'a> {
    user_id: AggregateId,
    vendor_id: AggregateId,
    pet_id: AggregateId,
    service_ids: &'a [AggregateId],
    /// Direct bookings need active offerings; paid bookings keep what was paid for.
    require_bookable: bool,
}

struct Snapshot {
    user: BookedUser,
    vendor: BookedVendor,
    pet: AssignedPet,
    services_total: Money,
}

async fn snapshot<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    refs: BookingRefs<'_>,
) -> Result<Snapshot, DomainError> {
    let user = uow.users()?.get_by_id(refs.user_id).await?;
    let vendor = uow.vendors()?.get_by_id(refs.vendor_id).await?;
    let pet = uow.pets()?.get_by_id(refs.pet_id).await?;
    if pet.owner_id() != Some(refs.user_id) {
        return Err(ScheduleError::PetNotOwned(refs.pet_id).into());
    }

    let mut offerings = uow.offerings()?;
    let mut services = Vec::with_capacity(refs.service_ids.len());
    for service_id in refs.service_ids {
        let offering = offerings.get_by_id(*service_id).await?;
        let sold_here = offering.vendor_id() == Some(refs.vendor_id);
        if !sold_here || (refs.require_bookable && !offering.is_active()) {
            return Err(ScheduleError::ServiceNotOffered(*service_id).into());
        }
        services.push(BookedService {
            service_id: *service_id,
            name: offering.name().to_string(),
            price: offering.price(),
            duration_minutes: offering.duration_minutes(),
        });
    }
    let services_total = Money::checked_sum(services.iter().map(|s| s.price))
        .ok_or(ScheduleError::TotalOverflow)?;

    Ok(Snapshot {
        user: BookedUser {
            user_id: refs.user_id,
            full_name: user.full_name().to_string(),
            email: user.email().to_string(),
            phone: user.phone().map(str::to_string),
        },
        vendor: BookedVendor {
            vendor_id: refs.vendor_id,
            name: vendor.name().to_string(),
            phone: vendor.phone().map(str::to_string),
            address: vendor.address().map(str::to_string),
            services,
        },
        pet: AssignedPet {
            pet_id: refs.pet_id,
            name: pet.name().to_string(),
            species: pet.species().to_string(),
            breed: pet.breed().map(str::to_string),
        },
        services_total,
    })
}

async fn create_direct<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    cmd: &CreateSchedule,
) -> Result<CommandOutcome<Schedule>, DomainError> {
    let snapshot = snapshot(
        uow,
        BookingRefs {
            user_id: cmd.user_id,
            vendor_id: cmd.vendor_id,
            pet_id: cmd.pet_id,
            service_ids: &cmd.service_ids,
            require_bookable: true,
        },
    )
    .await?;

    let draft = ScheduleDraft {
        payment_id: None,
        booking_user: snapshot.user,
        booked_vendor: snapshot.vendor,
        assigned_pet: snapshot.pet,
        start_time: cmd.start_time,
        end_time: cmd.end_time,
        total_price: snapshot.services_total,
    };
    save_new(uow, draft).await
}

async fn create_for_payment<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    payment_id: AggregateId,
) -> Result<CommandOutcome<Schedule>, DomainError> {
    if let Some(existing) = uow
        .schedules()?
        .find_by_key(&Schedule::payment_key(payment_id))
        .await?
    {
        tracing::debug!(%payment_id, "payment already scheduled");
        return Ok(CommandOutcome::unchanged(existing.into_state()));
    }

    let payment = uow.payments()?.get_by_id(payment_id).await?;
    if payment.status() != PaymentStatus::Paid {
        return Err(ScheduleError::PaymentNotPaid {
            status: payment.status(),
        }
        .into());
    }

    let incomplete = || ScheduleError::IncompleteBooking(payment_id);
    let refs = BookingRefs {
        user_id: payment.user_id().ok_or_else(incomplete)?,
        vendor_id: payment.vendor_id().ok_or_else(incomplete)?,
        pet_id: payment.pet_id().ok_or_else(incomplete)?,
        service_ids: payment.service_ids(),
        require_bookable: false,
    };
    let (start_time, end_time) = payment
        .start_time()
        .zip(payment.end_time())
        .ok_or_else(incomplete)?;
    let snapshot = snapshot(uow, refs).await?;

    let draft = ScheduleDraft {
        payment_id: Some(payment_id),
        booking_user: snapshot.user,
        booked_vendor: snapshot.vendor,
        assigned_pet: snapshot.pet,
        start_time,
        end_time,
        total_price: payment.amount(),
    };
    save_new(uow, draft).await
}

async fn save_new<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    draft: ScheduleDraft,
) -> Result<CommandOutcome<Schedule>, DomainError> {
    let schedule_id = AggregateId::new();
    let mut root = AggregateRoot::<Schedule>::new();
    root.execute(|s| s.create(schedule_id, draft))?;
    let events = uow.schedules()?.save(&mut root).await?;

    tracing::info!(%schedule_id, payment_id = ?root.payment_id(), "schedule created");
    Ok(CommandOutcome::with_events(root.into_state(), events))
}

async fn mutate<S, F>(
    uow: &mut UnitOfWork<S>,
    schedule_id: AggregateId,
    decide: F,
) -> Result<CommandOutcome<Schedule>, DomainError>
where
    S: TransactionalStore,
    F: FnOnce(&Schedule) -> Result<Vec<ScheduleEvent>, ScheduleError>,
{
    let mut schedules = uow.schedules()?;
    let mut root = schedules.get_by_id(schedule_id).await?;
    root.execute(decide)?;
    let events = schedules.save(&mut root).await?;
    Ok(CommandOutcome::with_events(root.into_state(), events))
}

async fn load<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    schedule_id: AggregateId,
) -> Result<CommandOutcome<Schedule>, DomainError> {
    let root = uow.schedules()?.get_by_id(schedule_id).await?;
    Ok(CommandOutcome::unchanged(root.into_state()))
}

async fn find_for_payment<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    payment_id: AggregateId,
) -> Result<CommandOutcome<Option<Schedule>>, DomainError> {
    let found = uow
        .schedules()?
        .find_by_key(&Schedule::payment_key(payment_id))
        .await?;
    Ok(CommandOutcome::unchanged(found.map(AggregateRoot::into_state)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::aggregate::Aggregate;
    use crate::gateway::InMemoryPaymentGateway;
    use crate::payment::PaymentService;
    use crate::schedule::ScheduleStatus;
    use crate::test_support::{Booking, payment_command, pipeline, seed_booking};
    use chrono::Duration;
    use store::InMemoryStore;

    fn direct(booking: &Booking) -> CreateSchedule {
        let start = Utc::now() + Duration::days(3);
        CreateSchedule {
            user_id: booking.user_id,
            vendor_id: booking.vendor_id,
            pet_id: booking.pet_id,
            service_ids: vec![booking.offering_id],
            start_time: start,
            end_time: start + Duration::hours(1),
        }
    }

    async fn paid_payment(
        pipeline: &CommandPipeline<InMemoryStore>,
        booking: &Booking,
    ) -> AggregateId {
        let gateway = InMemoryPaymentGateway::new();
        let payments = PaymentService::new(pipeline.clone(), Arc::new(gateway.clone()));
        let ctx = CommandContext::new();
        let payment = payments
            .create_payment(&ctx, payment_command(booking, 50_000, 2, 100_000))
            .await
            .unwrap();
        gateway.set_status(payment.order_code().unwrap(), "PAID");
        payments
            .confirm_payment(&ctx, payment.order_code().unwrap())
            .await
            .unwrap();
        payment.id().unwrap()
    }

    #[tokio::test]
    async fn direct_booking_snapshots_references() {
        let (_store, pipeline, _) = pipeline().await;
        let booking = seed_booking(&pipeline, None).await;
        let service = ScheduleService::new(pipeline);

        let schedule = service
            .create_schedule(&CommandContext::new(), direct(&booking))
            .await
            .unwrap();

        assert_eq!(schedule.status(), ScheduleStatus::Pending);
        assert_eq!(schedule.vendor_id(), Some(booking.vendor_id));
        let vendor = schedule.booked_vendor().unwrap();
        assert_eq!(vendor.services[0].service_id, booking.offering_id);
        assert_eq!(schedule.assigned_pet().unwrap().pet_id, booking.pet_id);
    }

    #[tokio::test]
    async fn schedule_for_payment_is_created_once() {
        let (store, pipeline, _) = pipeline().await;
        let booking = seed_booking(&pipeline, None).await;
        let payment_id = paid_payment(&pipeline, &booking).await;
        let service = ScheduleService::new(pipeline);
        let ctx = CommandContext::new();

        let first = service
            .create_schedule_for_payment(&ctx, payment_id)
            .await
            .unwrap();
        let second = service
            .create_schedule_for_payment(&ctx, payment_id)
            .await
            .unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(first.total_price(), Money::new(100_000));
        assert_eq!(store.record_count("Schedule").await, 1);
    }

    #[tokio::test]
    async fn unpaid_payment_cannot_be_scheduled() {
        let (_store, pipeline, _) = pipeline().await;
        let booking = seed_booking(&pipeline, None).await;
        let payments = PaymentService::new(
            pipeline.clone(),
            Arc::new(InMemoryPaymentGateway::new()),
        );
        let payment = payments
            .create_payment(
                &CommandContext::new(),
                payment_command(&booking, 50_000, 2, 100_000),
            )
            .await
            .unwrap();
        let service = ScheduleService::new(pipeline);

        let err = service
            .create_schedule_for_payment(&CommandContext::new(), payment.id().unwrap())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DomainError::Schedule(ScheduleError::PaymentNotPaid {
                status: PaymentStatus::Pending
            })
        ));
    }

    #[tokio::test]
    async fn lifecycle_through_service() {
        let (_store, pipeline, _) = pipeline().await;
        let booking = seed_booking(&pipeline, None).await;
        let service = ScheduleService::new(pipeline);
        let ctx = CommandContext::new();
        let id = service
            .create_schedule(&ctx, direct(&booking))
            .await
            .unwrap()
            .id()
            .unwrap();

        service.confirm_schedule(&ctx, id).await.unwrap();
        let done = service.complete_schedule(&ctx, id).await.unwrap();
        assert_eq!(done.status(), ScheduleStatus::Completed);

        let err = service
            .cancel_schedule(&ctx, id, Some("too late".into()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }
}
