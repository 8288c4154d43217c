//! Offering aggregate: a bookable service sold by a vendor.

use std::time::Instant;

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};
use store::TransactionalStore;
use thiserror::Error;

use crate::aggregate::{Aggregate, AggregateRoot, DomainEvent};
use crate::command::{CommandOutcome, CommandPipeline};
use crate::context::CommandContext;
use crate::error::DomainError;
use crate::unit_of_work::UnitOfWork;
use crate::value_objects::Money;

/// Errors that can occur during offering operations.
#[derive(Debug, Error)]
pub enum OfferingError {
    /// Offering name is required.
    #[error("Offering name is required")]
    NameRequired,

    /// Price must be positive.
    #[error("Invalid price: {0} (must be greater than 0)")]
    InvalidPrice(Money),

    /// Duration must be positive.
    #[error("Invalid duration: {0} minutes")]
    InvalidDuration(u32),

    /// Offering is already created.
    #[error("Offering already created")]
    AlreadyCreated,

    /// Offering was deactivated.
    #[error("Offering is inactive")]
    Inactive,
}

/// Events that can occur on an offering aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OfferingEvent {
    OfferingCreated(OfferingCreatedData),
    OfferingPriceChanged(OfferingPriceChangedData),
    OfferingDeactivated(OfferingDeactivatedData),
}

impl DomainEvent for OfferingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OfferingEvent::OfferingCreated(_) => "OfferingCreated",
            OfferingEvent::OfferingPriceChanged(_) => "OfferingPriceChanged",
            OfferingEvent::OfferingDeactivated(_) => "OfferingDeactivated",
        }
    }
}

/// Data for OfferingCreated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferingCreatedData {
    pub offering_id: AggregateId,
    pub vendor_id: AggregateId,
    pub name: String,
    pub price: Money,
    pub duration_minutes: u32,
    pub created_at: DateTime<Utc>,
}

/// Data for OfferingPriceChanged event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferingPriceChangedData {
    pub old_price: Money,
    pub new_price: Money,
}

/// Data for OfferingDeactivated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferingDeactivatedData {
    pub deactivated_at: DateTime<Utc>,
}

/// Offering aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Offering {
    id: Option<AggregateId>,
    vendor_id: Option<AggregateId>,
    name: String,
    price: Money,
    duration_minutes: u32,
    active: bool,
}

impl Aggregate for Offering {
    type Event = OfferingEvent;
    type Error = OfferingError;

    fn aggregate_type() -> &'static str {
        "Offering"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OfferingEvent::OfferingCreated(data) => {
                self.id = Some(data.offering_id);
                self.vendor_id = Some(data.vendor_id);
                self.name = data.name;
                self.price = data.price;
                self.duration_minutes = data.duration_minutes;
                self.active = true;
            }
            OfferingEvent::OfferingPriceChanged(data) => self.price = data.new_price,
            OfferingEvent::OfferingDeactivated(_) => self.active = false,
        }
    }
}

impl Offering {
    pub fn vendor_id(&self) -> Option<AggregateId> {
        self.vendor_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns true if the offering can be booked with `vendor_id`.
    pub fn bookable_with(&self, vendor_id: AggregateId) -> bool {
        self.active && self.vendor_id == Some(vendor_id)
    }

    /// Creates an offering for a vendor.
    pub fn create(
        &self,
        offering_id: AggregateId,
        cmd: &CreateOffering,
    ) -> Result<Vec<OfferingEvent>, OfferingError> {
        if self.id.is_some() {
            return Err(OfferingError::AlreadyCreated);
        }
        cmd.validate()?;

        Ok(vec![OfferingEvent::OfferingCreated(OfferingCreatedData {
            offering_id,
            vendor_id: cmd.vendor_id,
            name: cmd.name.trim().to_string(),
            price: cmd.price,
            duration_minutes: cmd.duration_minutes,
            created_at: Utc::now(),
        })])
    }

    /// Changes the list price. Existing payments keep the price they were created with.
    pub fn change_price(&self, new_price: Money) -> Result<Vec<OfferingEvent>, OfferingError> {
        if !self.active {
            return Err(OfferingError::Inactive);
        }
        if !new_price.is_positive() {
            return Err(OfferingError::InvalidPrice(new_price));
        }
        if new_price == self.price {
            return Ok(vec![]);
        }
        Ok(vec![OfferingEvent::OfferingPriceChanged(
            OfferingPriceChangedData {
                old_price: self.price,
                new_price,
            },
        )])
    }

    /// Withdraws the offering from sale. Deactivating twice is a no-op.
    pub fn deactivate(&self) -> Result<Vec<OfferingEvent>, OfferingError> {
        if !self.active {
            return Ok(vec![]);
        }
        Ok(vec![OfferingEvent::OfferingDeactivated(
            OfferingDeactivatedData {
                deactivated_at: Utc::now(),
            },
        )])
    }
}

/// Command to create an offering.
#[derive(Debug, Clone)]
pub struct CreateOffering {
    pub vendor_id: AggregateId,
    pub name: String,
    pub price: Money,
    pub duration_minutes: u32,
}

impl CreateOffering {
    pub fn validate(&self) -> Result<(), OfferingError> {
        if self.name.trim().is_empty() {
            return Err(OfferingError::NameRequired);
        }
        if !self.price.is_positive() {
            return Err(OfferingError::InvalidPrice(self.price));
        }
        if self.duration_minutes == 0 {
            return Err(OfferingError::InvalidDuration(self.duration_minutes));
        }
        Ok(())
    }
}

/// Service for managing offerings.
pub struct OfferingService<S: TransactionalStore> {
    pipeline: CommandPipeline<S>,
}

impl<S: TransactionalStore> OfferingService<S> {
    pub fn new(pipeline: CommandPipeline<S>) -> Self {
        Self { pipeline }
    }

    /// Creates an offering. The vendor must exist.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn create_offering(
        &self,
        ctx: &CommandContext,
        cmd: CreateOffering,
    ) -> Result<Offering, DomainError> {
        const COMMAND: &str = "create_offering";
        let started = Instant::now();
        if let Err(e) = cmd.validate() {
            return self.pipeline.reject(COMMAND, e.into());
        }

        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = create(&mut uow, &cmd).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }

    /// Changes an offering's price.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn update_price(
        &self,
        ctx: &CommandContext,
        offering_id: AggregateId,
        price: Money,
    ) -> Result<Offering, DomainError> {
        const COMMAND: &str = "update_offering_price";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = mutate(&mut uow, offering_id, |o| o.change_price(price)).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }

    /// Withdraws an offering from sale.
    #[tracing::instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()))]
    pub async fn deactivate(
        &self,
        ctx: &CommandContext,
        offering_id: AggregateId,
    ) -> Result<Offering, DomainError> {
        const COMMAND: &str = "deactivate_offering";
        let started = Instant::now();
        let mut uow = self.pipeline.begin(COMMAND, ctx).await?;
        let outcome = mutate(&mut uow, offering_id, Offering::deactivate).await;
        self.pipeline.finish(COMMAND, uow, outcome, started).await
    }
}

async fn create<S: TransactionalStore>(
    uow: &mut UnitOfWork<S>,
    cmd: &CreateOffering,
) -> Result<CommandOutcome<Offering>, DomainError> {
    uow.vendors()?.get_by_id(cmd.vendor_id).await?;

    let mut root = AggregateRoot::<Offering>::new();
    root.execute(|o| o.create(AggregateId::new(), cmd))?;
    let events = uow.offerings()?.save(&mut root).await?;
    Ok(CommandOutcome::with_events(root.into_state(), events))
}

async fn mutate<S, F>(
    uow: &mut UnitOfWork<S>,
    offering_id: AggregateId,
    decide: F,
) -> Result<CommandOutcome<Offering>, DomainError>
where
    S: TransactionalStore,
    F: FnOnce(&Offering) -> Result<Vec<OfferingEvent>, OfferingError>,
{
    let mut offerings = uow.offerings()?;
    let mut root = offerings.get_by_id(offering_id).await?;
    root.execute(decide)?;
    let events = offerings.save(&mut root).await?;
    Ok(CommandOutcome::with_events(root.into_state(), events))
}
